use crate::backup::compress::CompressorConfig;
use crate::backup::destination::{Destination, DestinationConfig};
use crate::backup::dump::sqlite::SqliteDumper;
use crate::backup::dump::{DumpSettings, Dumper};
use crate::backup::events::{EventSinkConfig, Notifier};
use crate::backup::job::{BackupJob, DatabaseEntry};
use crate::backup::path::normalize_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::selection::FileSelector;
use crate::backup::validate::{validate_valid_archive_prefix, validate_valid_storage_name};
use itertools::Itertools;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::path::{Path, PathBuf};
use std::result;
use std::sync::Arc;
use validator::{Validate, ValidationErrors};

/// One entry of the `databases` section, keyed by `type`.
#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum DatabaseConfig {
    Sqlite {
        #[serde(flatten)]
        dumper: SqliteDumper,
        #[serde(flatten)]
        settings: DumpSettings,
    },
}

impl Validate for DatabaseConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            Self::Sqlite { dumper, .. } => dumper.validate(),
        }
    }
}

impl DatabaseConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::Sqlite { dumper, .. } => dumper.name(),
        }
    }

    /// File the connection reads from.
    pub fn source_path(&self) -> &Path {
        match self {
            Self::Sqlite { dumper, .. } => dumper.path(),
        }
    }

    pub fn into_entry(self) -> DatabaseEntry {
        let (name, settings, dumper): (String, DumpSettings, Arc<dyn Dumper>) = match self {
            Self::Sqlite { dumper, settings } => (dumper.name().clone(), settings, Arc::new(dumper)),
        };
        DatabaseEntry::builder()
            .name(name)
            .settings(settings)
            .dumper(dumper)
            .build()
    }
}

#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate)]
pub struct BackupConfig {
    /// Directory created under every destination for this application.
    #[validate(custom(function = validate_valid_storage_name))]
    pub name: String,
    #[serde(default)]
    #[validate(custom(function = validate_valid_archive_prefix))]
    pub archive_prefix: String,
    /// Scratch directory, emptied and removed by every run.
    pub workspace_dir: PathBuf,
    #[serde(default)]
    #[validate(nested)]
    pub compressor: CompressorConfig,
    #[serde(default = "CompressorConfig::gzip")]
    #[validate(nested)]
    pub dump_compressor: CompressorConfig,
    #[serde(default)]
    #[validate(nested)]
    pub files: FileSelector,
    #[serde(default)]
    #[validate(nested)]
    pub databases: Vec<DatabaseConfig>,
    #[serde(default)]
    #[validate(nested)]
    pub destinations: Vec<DestinationConfig>,
    #[serde(default)]
    #[validate(nested)]
    pub notifications: Vec<EventSinkConfig>,
    /// Destinations written concurrently; defaults to one per CPU.
    #[validate(range(min = 1))]
    pub parallel_destinations: Option<usize>,
}

impl BackupConfig {
    pub fn thread_pool(&self) -> Result<ThreadPool> {
        Ok(ThreadPoolBuilder::new()
            .num_threads(self.parallel_destinations.unwrap_or_default())
            .thread_name(|i| format!("destination-{i}"))
            .build()?)
    }

    /// Resolves every configured kind to its implementation and assembles the job.
    pub fn build_job(&self, pool: Arc<ThreadPool>) -> Result<BackupJob> {
        if let Some(name) = self.databases.iter().map(DatabaseConfig::name).duplicates().next() {
            return Err(Error::InvalidConfiguration(format!(
                "database connection {name:?} is configured more than once"
            )));
        }
        if let Some(name) = self
            .destinations
            .iter()
            .map(DestinationConfig::disk_name)
            .duplicates()
            .next()
        {
            return Err(Error::InvalidConfiguration(format!(
                "destination {name:?} is configured more than once"
            )));
        }

        let destinations: Vec<Destination> = self
            .destinations
            .iter()
            .cloned()
            .map(DestinationConfig::into_destination)
            .collect();
        self.check_workspace_overlap(&destinations)?;

        let notifier = Notifier::new(
            self.notifications
                .iter()
                .cloned()
                .map(EventSinkConfig::into_sink)
                .collect(),
        );

        Ok(BackupJob::builder()
            .backup_name(self.name.clone())
            .workspace_dir(self.workspace_dir.clone())
            .pool(pool)
            .archive_prefix(self.archive_prefix.clone())
            .databases(
                self.databases
                    .iter()
                    .cloned()
                    .map(DatabaseConfig::into_entry)
                    .collect(),
            )
            .destinations(destinations)
            .files(self.files.clone())
            .notifier(notifier)
            .archive_compressor(self.compressor.clone())
            .dump_compressor(self.dump_compressor.clone())
            .build())
    }

    /// The workspace is wiped on every run, so nothing else may live below it.
    fn check_workspace_overlap(&self, destinations: &[Destination]) -> Result<()> {
        let workspace = normalize_path(&self.workspace_dir)?;
        let guarded = self
            .files
            .include()
            .iter()
            .map(|p| ("included path", p.clone()))
            .chain(
                destinations
                    .iter()
                    .filter_map(Destination::local_directory)
                    .map(|p| ("destination root", p)),
            )
            .chain(
                self.databases
                    .iter()
                    .map(|d| ("database file", d.source_path().to_path_buf())),
            );
        for (kind, path) in guarded {
            let path = normalize_path(&path)?;
            if path.starts_with(&workspace) {
                return Err(Error::InvalidConfiguration(format!(
                    "workspace_dir {workspace:?} would delete the {kind} {path:?} on every run"
                )));
            }
        }
        Ok(())
    }
}
