pub mod local;
pub mod replicate;

use crate::backup::destination::local::LocalDiskDestination;
use crate::backup::dump::window::FilterMode;
use crate::backup::result_error::result::Result;
use bon::Builder;
use derive_more::{Display, From};
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::result;
use std::sync::Arc;
use validator::{Validate, ValidationErrors};

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilesystemType {
    #[display("local")]
    Local,
    #[display("remote")]
    Remote,
}

/// Copies a finished archive to one storage target.
pub trait DestinationWriter: Debug + Send + Sync {
    fn disk_name(&self) -> &str;

    fn filesystem_type(&self) -> FilesystemType;

    /// Root of the stored backups; excluded from file selection when local.
    fn backup_directory_path(&self) -> PathBuf;

    /// Stores `archive` at `storage_path`, relative to the destination root.
    fn write(&self, archive: &Path, storage_path: &Path) -> Result<PathBuf>;
}

/// A configured destination plus its naming policy.
#[derive(Clone, Debug, Builder, Getters)]
#[getset(get = "pub")]
pub struct Destination {
    writer: Arc<dyn DestinationWriter>,
    /// Split stored archives into `full`/`weekly`/`monthly` by active filter.
    #[builder(default)]
    log_archive: bool,
}

impl Destination {
    pub fn disk_name(&self) -> &str {
        self.writer.disk_name()
    }

    pub fn storage_path(&self, backup_name: &str, mode: FilterMode, file_name: &str) -> PathBuf {
        let mut path = PathBuf::from(backup_name);
        if self.log_archive {
            path.push(mode.storage_suffix());
        }
        path.push(file_name);
        path
    }

    /// The local directory this destination writes into, if any.
    pub fn local_directory(&self) -> Option<PathBuf> {
        match self.writer.filesystem_type() {
            FilesystemType::Local => Some(self.writer.backup_directory_path()),
            FilesystemType::Remote => None,
        }
    }
}

#[derive(Clone, From, Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum DestinationWriterConfig {
    Local(LocalDiskDestination),
}

impl Validate for DestinationWriterConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            Self::Local(inner) => inner.validate(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, Validate)]
pub struct DestinationConfig {
    #[serde(flatten)]
    #[validate(nested)]
    writer: DestinationWriterConfig,
    #[serde(default)]
    log_archive: bool,
}

impl DestinationConfig {
    pub fn disk_name(&self) -> &str {
        match &self.writer {
            DestinationWriterConfig::Local(inner) => inner.disk_name(),
        }
    }

    pub fn into_destination(self) -> Destination {
        let writer: Arc<dyn DestinationWriter> = match self.writer {
            DestinationWriterConfig::Local(inner) => Arc::new(inner),
        };
        Destination::builder()
            .writer(writer)
            .log_archive(self.log_archive)
            .build()
    }
}
