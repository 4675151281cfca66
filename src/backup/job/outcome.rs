use crate::backup::archive::ArchiveSummary;
use crate::backup::destination::replicate::{DestinationFailure, WrittenDestination};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use getset::Getters;
use std::path::PathBuf;

/// What a completed run produced.
#[derive(Debug, Getters)]
#[getset(get = "pub")]
pub struct BackupReport {
    archive: ArchiveSummary,
    dumps: Vec<PathBuf>,
    written: Vec<WrittenDestination>,
    failures: Vec<DestinationFailure>,
    /// `(connection, table, deleted rows)` for each purged log table.
    purged: Vec<(String, String, usize)>,
}

impl BackupReport {
    pub(crate) fn new(
        archive: ArchiveSummary,
        dumps: Vec<PathBuf>,
        written: Vec<WrittenDestination>,
        failures: Vec<DestinationFailure>,
    ) -> Self {
        Self {
            archive,
            dumps,
            written,
            failures,
            purged: Vec::new(),
        }
    }

    pub(crate) fn record_purge(&mut self, connection: &str, table: &str, deleted: usize) {
        self.purged
            .push((connection.to_owned(), table.to_owned(), deleted));
    }
}

#[derive(Debug)]
pub enum BackupOutcome {
    Success(BackupReport),
    PartialFailure(BackupReport),
    Fatal(Error),
}

impl From<Result<BackupReport>> for BackupOutcome {
    fn from(value: Result<BackupReport>) -> Self {
        match value {
            Ok(report) if report.failures.is_empty() => BackupOutcome::Success(report),
            Ok(report) => BackupOutcome::PartialFailure(report),
            Err(e) => BackupOutcome::Fatal(e),
        }
    }
}

impl BackupOutcome {
    /// Process exit code; partial failures only count when asked to.
    pub fn exit_code(&self, fail_on_partial: bool) -> u8 {
        match self {
            BackupOutcome::Success(_) => 0,
            BackupOutcome::PartialFailure(_) if fail_on_partial => 1,
            BackupOutcome::PartialFailure(_) => 0,
            BackupOutcome::Fatal(_) => 1,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, BackupOutcome::Fatal(_))
    }
}
