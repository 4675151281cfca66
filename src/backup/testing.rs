//! In-memory collaborators for unit tests.

use crate::backup::destination::{DestinationWriter, FilesystemType};
use crate::backup::dump::window::DateFilterWindow;
use crate::backup::dump::{DumpReceipt, DumpRequest, Dumper};
use crate::backup::events::{BackupEvent, EventKind, EventSink};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct FakeDumper {
    name: String,
    tables: Vec<String>,
    views: Vec<String>,
    fail: bool,
    /// Row id reported for every windowed table; `None` reports no bound.
    last_rowid: Option<i64>,
    dumps: Mutex<Vec<(PathBuf, DumpRequest)>>,
    deletions: Mutex<Vec<(String, DateFilterWindow, i64)>>,
}

impl FakeDumper {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            last_rowid: Some(42),
            ..Default::default()
        }
    }

    pub fn without_rowids(mut self) -> Self {
        self.last_rowid = None;
        self
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }

    pub fn with_tables<const N: usize>(mut self, tables: [&str; N]) -> Self {
        self.tables = tables.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_views<const N: usize>(mut self, views: [&str; N]) -> Self {
        self.views = views.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn dumps(&self) -> Vec<(PathBuf, DumpRequest)> {
        self.dumps.lock().unwrap().clone()
    }

    pub fn deletions(&self) -> Vec<(String, DateFilterWindow, i64)> {
        self.deletions.lock().unwrap().clone()
    }
}

impl Dumper for FakeDumper {
    fn db_name(&self) -> &str {
        &self.name
    }

    fn table_names(&self) -> Result<Vec<String>> {
        Ok(self.tables.clone())
    }

    fn view_names(&self) -> Result<Vec<String>> {
        Ok(self.views.clone())
    }

    fn dump_to_file(&self, path: &Path, request: &DumpRequest) -> Result<DumpReceipt> {
        if self.fail {
            return Err(Error::from(std::io::Error::other("dump tool exited with status 2")));
        }
        std::fs::write(path, format!("-- dump of {}\n", self.name))?;
        self.dumps
            .lock()
            .unwrap()
            .push((path.to_path_buf(), request.clone()));

        let mut receipt = DumpReceipt::default();
        if let (Some(_), Some(last_rowid)) = (request.window(), self.last_rowid) {
            for table in request.include_tables() {
                receipt.record(table, last_rowid);
            }
        }
        Ok(receipt)
    }

    fn delete_rows_in_window(
        &self,
        table: &str,
        window: &DateFilterWindow,
        last_rowid: i64,
    ) -> Result<usize> {
        self.deletions
            .lock()
            .unwrap()
            .push((table.to_owned(), *window, last_rowid));
        Ok(1)
    }
}

#[derive(Debug)]
pub struct FakeDestination {
    name: String,
    fail: bool,
    local_root: Option<PathBuf>,
    written: Mutex<Vec<PathBuf>>,
    archive_seen: Mutex<bool>,
}

impl FakeDestination {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            fail: false,
            local_root: None,
            written: Mutex::new(Vec::new()),
            archive_seen: Mutex::new(false),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }

    pub fn local(name: &str, root: &Path) -> Self {
        Self {
            local_root: Some(root.to_path_buf()),
            ..Self::new(name)
        }
    }

    pub fn written(&self) -> Vec<PathBuf> {
        self.written.lock().unwrap().clone()
    }

    /// Whether the archive existed on disk when it was handed over.
    pub fn archive_seen(&self) -> bool {
        *self.archive_seen.lock().unwrap()
    }
}

impl DestinationWriter for FakeDestination {
    fn disk_name(&self) -> &str {
        &self.name
    }

    fn filesystem_type(&self) -> FilesystemType {
        match self.local_root {
            Some(_) => FilesystemType::Local,
            None => FilesystemType::Remote,
        }
    }

    fn backup_directory_path(&self) -> PathBuf {
        self.local_root.clone().unwrap_or_default()
    }

    fn write(&self, archive: &Path, storage_path: &Path) -> Result<PathBuf> {
        if self.fail {
            return Err(Error::from(std::io::Error::other("connection reset by peer")));
        }
        if archive.is_file() {
            *self.archive_seen.lock().unwrap() = true;
        }
        self.written.lock().unwrap().push(storage_path.to_path_buf());
        Ok(PathBuf::from(&self.name).join(storage_path))
    }
}

#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<BackupEvent>>,
}

impl RecordingEventSink {
    pub fn events(&self) -> Vec<BackupEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().iter().map(BackupEvent::kind).collect()
    }
}

impl EventSink for RecordingEventSink {
    fn handle(&self, event: &BackupEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[derive(Debug)]
pub struct FailingEventSink;

impl EventSink for FailingEventSink {
    fn handle(&self, _event: &BackupEvent) -> Result<()> {
        Err(Error::smtp_send_error("mailbox unavailable"))
    }
}
