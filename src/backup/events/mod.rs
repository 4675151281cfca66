pub mod smtp;

use crate::backup::events::smtp::SmtpEventSink;
use crate::backup::result_error::result::Result;
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;
use std::result;
use std::sync::Arc;
use validator::{Validate, ValidationErrors};

/// Lifecycle notifications of a backup job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackupEvent {
    DumpingDatabase {
        connection: String,
    },
    ManifestCreated {
        entry_count: usize,
        files: Arc<[PathBuf]>,
    },
    ArchiveCreated {
        path: PathBuf,
        size: u64,
        entry_count: usize,
    },
    DestinationWriteSucceeded {
        disk_name: String,
    },
    JobFailed {
        error: String,
        disk_name: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DumpingDatabase,
    ManifestCreated,
    ArchiveCreated,
    DestinationWriteSucceeded,
    JobFailed,
}

impl BackupEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            BackupEvent::DumpingDatabase { .. } => EventKind::DumpingDatabase,
            BackupEvent::ManifestCreated { .. } => EventKind::ManifestCreated,
            BackupEvent::ArchiveCreated { .. } => EventKind::ArchiveCreated,
            BackupEvent::DestinationWriteSucceeded { .. } => EventKind::DestinationWriteSucceeded,
            BackupEvent::JobFailed { .. } => EventKind::JobFailed,
        }
    }

    pub fn topic(&self) -> String {
        match self {
            BackupEvent::DumpingDatabase { connection } => format!("Dumping database {connection}"),
            BackupEvent::ManifestCreated { .. } => "Backup manifest created".to_owned(),
            BackupEvent::ArchiveCreated { .. } => "Backup archive created".to_owned(),
            BackupEvent::DestinationWriteSucceeded { disk_name } => {
                format!("Successful new backup on {disk_name}")
            }
            BackupEvent::JobFailed {
                disk_name: Some(disk_name),
                ..
            } => format!("Failed back up to {disk_name}"),
            BackupEvent::JobFailed { .. } => "Backup failed".to_owned(),
        }
    }
}

impl std::fmt::Display for BackupEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupEvent::DumpingDatabase { connection } => {
                write!(f, "Dumping connection {connection}")
            }
            BackupEvent::ManifestCreated { entry_count, .. } => {
                write!(f, "Manifest created with {entry_count} entries")
            }
            BackupEvent::ArchiveCreated {
                path,
                size,
                entry_count,
            } => write!(
                f,
                "Archive {} created with {entry_count} entries ({size} bytes)",
                path.display()
            ),
            BackupEvent::DestinationWriteSucceeded { disk_name } => {
                write!(f, "Backup copied to destination {disk_name}")
            }
            BackupEvent::JobFailed {
                error,
                disk_name: Some(disk_name),
            } => write!(f, "Backup to destination {disk_name} failed:\n{error}"),
            BackupEvent::JobFailed { error, .. } => write!(f, "Backup failed:\n{error}"),
        }
    }
}

/// Receives backup lifecycle events.
pub trait EventSink: Debug + Send + Sync {
    fn handle(&self, event: &BackupEvent) -> Result<()>;
}

/// Writes every event to the tracing log.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn handle(&self, event: &BackupEvent) -> Result<()> {
        match event {
            BackupEvent::JobFailed { .. } => tracing::error!("{}: {}", event.topic(), event),
            BackupEvent::DumpingDatabase { .. } | BackupEvent::ManifestCreated { .. } => {
                tracing::debug!("{}", event)
            }
            _ => tracing::info!("{}", event),
        }
        Ok(())
    }
}

#[derive(Clone, From, Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum EventSinkConfig {
    Smtp(SmtpEventSink),
}

impl Validate for EventSinkConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            Self::Smtp(inner) => inner.validate(),
        }
    }
}

impl EventSinkConfig {
    pub fn into_sink(self) -> Arc<dyn EventSink> {
        match self {
            Self::Smtp(inner) => Arc::new(inner),
        }
    }
}

/// Fans events out to every sink without ever failing the caller.
///
/// The tracing log always sees the event; outbound sinks only when
/// notifications are enabled.
#[derive(Clone, Debug)]
pub struct Notifier {
    log: TracingEventSink,
    sinks: Vec<Arc<dyn EventSink>>,
    enabled: bool,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Notifier {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self {
            log: TracingEventSink,
            sinks,
            enabled: true,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn emit(&self, event: BackupEvent) {
        let _ = self.log.handle(&event);
        if !self.enabled {
            return;
        }
        for sink in &self.sinks {
            if let Err(e) = sink.handle(&event) {
                tracing::error!("Delivering {} event to {:?} failed: {}", event.kind(), sink, e);
            }
        }
    }
}
