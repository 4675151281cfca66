use crate::backup::destination::{DestinationWriter, FilesystemType};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use crate::backup::validate::{validate_valid_storage_name, validate_writable_dir};
use bon::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use validator::Validate;

/// Stores archives in a directory on a locally mounted filesystem.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[getset(get = "pub")]
pub struct LocalDiskDestination {
    #[validate(custom(function = validate_valid_storage_name))]
    #[builder(into)]
    name: String,
    #[validate(custom(function = validate_writable_dir))]
    #[builder(into)]
    root: PathBuf,
}

impl DestinationWriter for LocalDiskDestination {
    fn disk_name(&self) -> &str {
        &self.name
    }

    fn filesystem_type(&self) -> FilesystemType {
        FilesystemType::Local
    }

    fn backup_directory_path(&self) -> PathBuf {
        self.root.clone()
    }

    /// Copies through a `.tmp` sibling so readers never see a partial archive.
    fn write(&self, archive: &Path, storage_path: &Path) -> Result<PathBuf> {
        let target = self.root.join(storage_path);
        let file_name = target
            .file_name()
            .ok_or_else(|| Error::InvalidConfiguration(format!("{:?} has no file name", target)))?
            .to_string_lossy()
            .into_owned();
        let tmp = target.with_file_name(format!("{file_name}.tmp"));

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let copied = std::fs::copy(archive, &tmp)
            .and_then(|_| std::fs::File::open(&tmp)?.sync_all())
            .and_then(|_| std::fs::rename(&tmp, &target));
        if let Err(e) = copied {
            let mut error = Error::from(e);
            if let Err(e2) = std::fs::remove_file(&tmp) {
                if e2.kind() != std::io::ErrorKind::NotFound {
                    error = error.chain(e2.into());
                }
            }
            return Err(error.add_msg(format!("Copying {:?} to {:?} failed", archive, target)));
        }

        tracing::info!("Copied backup to {:?}", target);
        Ok(target)
    }
}
