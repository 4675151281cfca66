use crate::backup::destination::Destination;
use crate::backup::dump::window::FilterMode;
use crate::backup::events::{BackupEvent, Notifier};
use crate::backup::result_error::error::Error;
use getset::Getters;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct WrittenDestination {
    disk_name: String,
    location: PathBuf,
}

#[derive(Debug, Getters)]
#[getset(get = "pub")]
pub struct DestinationFailure {
    disk_name: String,
    error: Error,
}

/// Copies one finished archive to every destination.
///
/// Destinations are written in parallel on `pool`. A failing destination is
/// reported and recorded without affecting its siblings; the call returns
/// only after every attempt has finished.
pub fn replicate(
    pool: &ThreadPool,
    destinations: &[Destination],
    archive: &Path,
    backup_name: &str,
    mode: FilterMode,
    notifier: &Notifier,
) -> (Vec<WrittenDestination>, Vec<DestinationFailure>) {
    let file_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let results: Vec<Result<WrittenDestination, DestinationFailure>> = pool.install(|| {
        destinations
            .par_iter()
            .map(|destination| {
                let disk_name = destination.disk_name().to_owned();
                let storage_path = destination.storage_path(backup_name, mode, &file_name);
                tracing::info!("Copying {:?} to destination {} as {:?}", archive, disk_name, storage_path);

                match destination.writer().write(archive, &storage_path) {
                    Ok(location) => {
                        notifier.emit(BackupEvent::DestinationWriteSucceeded {
                            disk_name: disk_name.clone(),
                        });
                        Ok(WrittenDestination { disk_name, location })
                    }
                    Err(e) => {
                        let error = Error::DestinationWrite {
                            disk_name: disk_name.clone(),
                            error: Box::new(e),
                        };
                        notifier.emit(BackupEvent::JobFailed {
                            error: error.to_string(),
                            disk_name: Some(disk_name.clone()),
                        });
                        Err(DestinationFailure { disk_name, error })
                    }
                }
            })
            .collect()
    });

    let mut written = Vec::new();
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(w) => written.push(w),
            Err(f) => failures.push(f),
        }
    }
    (written, failures)
}
