pub mod outcome;

use crate::backup::archive::{ArchiveSummary, ArchiveWriter};
use crate::backup::compress::CompressorConfig;
use crate::backup::destination::replicate::replicate;
use crate::backup::destination::Destination;
use crate::backup::dump::policy::{DumpFilterPolicy, DumpPlan, SANITIZED_MARKER};
use crate::backup::dump::window::{DateFilterWindow, FilterMode};
use crate::backup::dump::{DumpReceipt, DumpSettings, Dumper};
use crate::backup::events::{BackupEvent, Notifier};
use crate::backup::file_ext::FileExtProvider;
use crate::backup::function_path;
use crate::backup::job::outcome::BackupReport;
use crate::backup::manifest::{Manifest, ManifestBuilder, MANIFEST_FILE_NAME};
use crate::backup::result_error::error::{Error, JobStage};
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddFunctionName;
use crate::backup::selection::FileSelector;
use crate::backup::validate::validate_archive_stem;
use crate::backup::workspace::TemporaryWorkspace;
use bon::Builder;
use chrono::{Local, NaiveDate};
use function_name::named;
use getset::Getters;
use rayon::ThreadPool;
use std::path::PathBuf;
use std::sync::Arc;

pub static TIME_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";
static DUMP_DIR: &str = "db-dumps";

/// A named connection to dump, with its filter settings.
#[derive(Clone, Debug, Builder, Getters)]
#[getset(get = "pub")]
pub struct DatabaseEntry {
    #[builder(into)]
    name: String,
    #[builder(default)]
    settings: DumpSettings,
    dumper: Arc<dyn Dumper>,
}

/// A dump file on disk plus what is needed to purge the rows it holds.
struct CompletedDump {
    dumper: Arc<dyn Dumper>,
    plan: DumpPlan,
    path: PathBuf,
    receipt: DumpReceipt,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Selection {
    #[default]
    Everything,
    OnlyDatabases,
    OnlyFiles,
}

/// One backup run: dump, select, manifest, archive, replicate.
///
/// Restrictions (`only_*`, filters, flags) consume the job and return a new
/// one, so a configured job can be cloned and narrowed without aliasing.
/// A single instance must not run concurrently with itself, nor share its
/// workspace directory with another job.
#[derive(Clone, Debug, Builder, Getters)]
#[getset(get = "pub")]
pub struct BackupJob {
    /// Directory name used under every destination.
    #[builder(into)]
    backup_name: String,
    #[builder(into)]
    workspace_dir: PathBuf,
    pool: Arc<ThreadPool>,
    #[builder(default, into)]
    archive_prefix: String,
    /// Archive file stem; a timestamp when unset.
    #[builder(into)]
    filename: Option<String>,
    #[builder(default)]
    databases: Vec<DatabaseEntry>,
    #[builder(default)]
    destinations: Vec<Destination>,
    #[builder(default)]
    files: FileSelector,
    #[builder(default)]
    sanitized: bool,
    #[builder(default)]
    notifier: Notifier,
    window: Option<DateFilterWindow>,
    #[builder(default)]
    archive_compressor: CompressorConfig,
    #[builder(default = CompressorConfig::gzip())]
    dump_compressor: CompressorConfig,
    #[builder(skip)]
    #[getset(skip)]
    selection: Selection,
}

impl BackupJob {
    pub fn only_databases(mut self) -> Result<Self> {
        if self.selection == Selection::OnlyFiles {
            return Err(Error::ConflictingSelection);
        }
        self.selection = Selection::OnlyDatabases;
        self.files = FileSelector::default();
        Ok(self)
    }

    pub fn only_files(mut self) -> Result<Self> {
        if self.selection == Selection::OnlyDatabases {
            return Err(Error::ConflictingSelection);
        }
        self.selection = Selection::OnlyFiles;
        self.databases.clear();
        Ok(self)
    }

    /// Keeps only the named connections, in their configured order.
    pub fn only_connections<S: AsRef<str>>(mut self, names: &[S]) -> Result<Self> {
        if let Some(missing) = names
            .iter()
            .find(|n| !self.databases.iter().any(|d| d.name == n.as_ref()))
        {
            return Err(Error::InvalidConfiguration(format!(
                "database connection {:?} is not configured",
                missing.as_ref()
            )));
        }
        self.databases
            .retain(|d| names.iter().any(|n| n.as_ref() == d.name));
        Ok(self)
    }

    pub fn only_backup_to<S: AsRef<str>>(mut self, disk_name: S) -> Result<Self> {
        let disk_name = disk_name.as_ref();
        self.destinations.retain(|d| d.disk_name() == disk_name);
        if self.destinations.is_empty() {
            return Err(Error::DestinationNotConfigured(disk_name.to_owned()));
        }
        self.destinations.truncate(1);
        Ok(self)
    }

    pub fn with_filter(mut self, mode: FilterMode, reference: NaiveDate) -> Result<Self> {
        if let Some(window) = &self.window {
            return Err(Error::FilterAlreadySet(format!(
                "{} {}..{}",
                window.mode(),
                window.start(),
                window.end()
            )));
        }
        self.window = DateFilterWindow::for_mode(mode, reference);
        Ok(self)
    }

    pub fn with_filter_week(self, reference: NaiveDate) -> Result<Self> {
        self.with_filter(FilterMode::Week, reference)
    }

    pub fn with_filter_month(self, reference: NaiveDate) -> Result<Self> {
        self.with_filter(FilterMode::Month, reference)
    }

    pub fn with_filename<S: Into<String>>(mut self, filename: S) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_sanitized(mut self, sanitized: bool) -> Self {
        self.sanitized = sanitized;
        self
    }

    pub fn with_notifications(mut self, enabled: bool) -> Self {
        self.notifier = self.notifier.enabled(enabled);
        self
    }

    pub fn filter_mode(&self) -> FilterMode {
        self.window.map(|w| w.mode()).unwrap_or_default()
    }

    fn archive_writer(&self, workspace: &TemporaryWorkspace) -> ArchiveWriter {
        ArchiveWriter::builder()
            .workspace(workspace.path())
            .compressor(self.archive_compressor.clone())
            .build()
    }

    /// `{prefix}{stem}[-sanitized].{ext}` for the given stem.
    pub fn archive_file_name(&self, stem: &str) -> String {
        let writer = ArchiveWriter::builder()
            .workspace(&self.workspace_dir)
            .compressor(self.archive_compressor.clone())
            .build();
        let marker = if self.sanitized {
            format!("-{SANITIZED_MARKER}")
        } else {
            String::new()
        };
        format!(
            "{}{}{}.{}",
            self.archive_prefix,
            stem,
            marker,
            writer.file_ext().unwrap_or_default()
        )
    }

    fn dump_policy(&self) -> DumpFilterPolicy {
        DumpFilterPolicy::builder()
            .maybe_window(self.window)
            .sanitized(self.sanitized)
            .compressor(self.dump_compressor.clone())
            .build()
    }

    /// Runs the whole pipeline once.
    ///
    /// Configuration errors, including an archive name that is not a plain
    /// file name, are returned before anything touches the disk.
    /// Any failure while dumping, selecting, building the manifest or the
    /// archive is fatal: it is reported once, the workspace is removed, and
    /// the error is returned. Destination failures only show up in the report.
    pub fn run(&self) -> Result<BackupReport> {
        if self.destinations.is_empty() {
            return Err(Error::NoDestinationsConfigured);
        }

        let stem = self
            .filename
            .clone()
            .unwrap_or_else(|| Local::now().format(TIME_FORMAT).to_string());
        validate_archive_stem(&stem).map_err(|e| Error::InvalidConfiguration(e.to_string()))?;
        tracing::info!("Starting backup {:?} of {}", stem, self.backup_name);

        let result = self.execute(&stem);
        match &result {
            Ok(report) => tracing::info!(
                "Backup {:?} finished, {} destinations written, {} failed",
                stem,
                report.written().len(),
                report.failures().len()
            ),
            Err(e) => {
                tracing::error!("Backup {:?} failed: {}", stem, e);
                self.notifier.emit(BackupEvent::JobFailed {
                    error: e.to_string(),
                    disk_name: None,
                });
            }
        }
        result
    }

    fn execute(&self, stem: &str) -> Result<BackupReport> {
        let workspace = TemporaryWorkspace::create(&self.workspace_dir)
            .map_err(|e| e.in_stage(JobStage::Workspace))?;

        let dumps = self
            .dump_databases(&workspace)
            .map_err(|e| e.in_stage(JobStage::Dump))?;
        let selected = self
            .select_files(&workspace)
            .map_err(|e| e.in_stage(JobStage::Selection))?;

        let dump_files: Vec<PathBuf> = dumps.iter().map(|d| d.path.clone()).collect();
        let manifest = self
            .build_manifest(&workspace, &dump_files, selected)
            .map_err(|e| e.in_stage(JobStage::Manifest))?;

        let summary = self
            .create_archive(&workspace, &manifest, stem)
            .map_err(|e| e.in_stage(JobStage::Archive))?;

        let (written, failures) = replicate(
            &self.pool,
            &self.destinations,
            summary.path(),
            &self.backup_name,
            self.filter_mode(),
            &self.notifier,
        );

        let mut report = BackupReport::new(summary, dump_files, written, failures);
        if !report.written().is_empty() {
            self.purge_archived_rows(&dumps, &mut report);
        } else if dumps.iter().any(|d| !d.plan.purge_tables().is_empty()) {
            tracing::warn!("No destination received the backup, archived log rows are kept");
        }
        Ok(report)
        // workspace dropped here, after every destination attempt finished
    }

    #[named]
    fn dump_databases(
        &self,
        workspace: &TemporaryWorkspace,
    ) -> Result<Vec<CompletedDump>> {
        if self.databases.is_empty() {
            return Ok(Vec::new());
        }
        let dump_dir = workspace.sub_dir(DUMP_DIR)?;
        let policy = self.dump_policy();

        let mut dumps = Vec::new();
        for database in &self.databases {
            let dumped = policy
                .plan(&database.name, &database.settings, database.dumper.as_ref())
                .and_then(|plan| match plan {
                    Some(plan) => {
                        let mut path = dump_dir.join(plan.file_name());
                        if path.exists() {
                            path = dump_dir.join(format!("{}-{}", database.name, plan.file_name()));
                        }
                        self.notifier.emit(BackupEvent::DumpingDatabase {
                            connection: database.name.clone(),
                        });
                        let receipt = database.dumper.dump_to_file(&path, plan.request())?;
                        Ok(Some((plan, path, receipt)))
                    }
                    None => Ok(None),
                })
                .map_err(|e| Error::Dump {
                    connection: database.name.clone(),
                    error: Box::new(e),
                })
                .add_fn_name(function_path!())?;

            if let Some((plan, path, receipt)) = dumped {
                tracing::info!("Dumped connection {} to {:?}", database.name, path);
                dumps.push(CompletedDump {
                    dumper: database.dumper.clone(),
                    plan,
                    path,
                    receipt,
                });
            }
        }
        Ok(dumps)
    }

    /// Local destination roots and the workspace never end up in the archive.
    fn select_files(&self, workspace: &TemporaryWorkspace) -> Result<Vec<PathBuf>> {
        if self.files.is_empty() {
            return Ok(Vec::new());
        }
        let excluded = std::iter::once(workspace.path().to_path_buf())
            .chain(self.destinations.iter().filter_map(Destination::local_directory));
        let selected = self
            .files
            .with_excluded(excluded)
            .selected_paths()?
            .collect::<Result<Vec<_>>>()?;
        tracing::info!("Selected {} paths to back up", selected.len());
        Ok(selected)
    }

    fn build_manifest(
        &self,
        workspace: &TemporaryWorkspace,
        dumps: &[PathBuf],
        selected: Vec<PathBuf>,
    ) -> Result<Manifest> {
        let mut builder = ManifestBuilder::new(workspace.join(MANIFEST_FILE_NAME));
        builder.add_files(dumps)?;
        builder.add_files(selected)?;
        let manifest = builder.build()?;
        if manifest.is_empty() {
            return Err(Error::EmptyBackup);
        }

        self.notifier.emit(BackupEvent::ManifestCreated {
            entry_count: manifest.count(),
            files: manifest.files().clone(),
        });
        Ok(manifest)
    }

    fn create_archive(
        &self,
        workspace: &TemporaryWorkspace,
        manifest: &Manifest,
        stem: &str,
    ) -> Result<ArchiveSummary> {
        let archive_path = workspace.join(self.archive_file_name(stem));
        let summary = self.archive_writer(workspace).write(manifest, &archive_path)?;
        self.notifier.emit(BackupEvent::ArchiveCreated {
            path: summary.path().clone(),
            size: *summary.size(),
            entry_count: *summary.entry_count(),
        });
        Ok(summary)
    }

    /// Deletes the archived log rows, never past the snapshot each dump was read from.
    fn purge_archived_rows(&self, dumps: &[CompletedDump], report: &mut BackupReport) {
        for dump in dumps {
            let plan = &dump.plan;
            let Some(window) = plan.request().window() else {
                continue;
            };
            for table in plan.purge_tables() {
                let Some(last_rowid) = dump.receipt.last_rowid(table) else {
                    tracing::warn!(
                        "No dumped row bound for {}.{}, keeping its rows",
                        plan.connection(),
                        table
                    );
                    continue;
                };
                tracing::warn!(
                    "Deleting rows of {}.{} created between {} and {} up to row id {}",
                    plan.connection(),
                    table,
                    window.start(),
                    window.end(),
                    last_rowid
                );
                match dump.dumper.delete_rows_in_window(table, window, last_rowid) {
                    Ok(deleted) => report.record_purge(plan.connection(), table, deleted),
                    Err(e) => tracing::error!(
                        "Deleting archived rows of {}.{} failed: {}",
                        plan.connection(),
                        table,
                        e
                    ),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::destination::local::LocalDiskDestination;
    use crate::backup::destination::DestinationWriter;
    use crate::backup::events::EventKind;
    use crate::backup::job::outcome::BackupOutcome;
    use crate::backup::testing::{FakeDestination, FakeDumper, RecordingEventSink};
    use chrono::NaiveDateTime;
    use rayon::ThreadPoolBuilder;
    use std::fs::File;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        temp_dir: TempDir,
        recorder: Arc<RecordingEventSink>,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            std::fs::create_dir_all(temp_dir.path().join("app/public")).unwrap();
            std::fs::write(temp_dir.path().join("app/public/index.html"), "<html>").unwrap();
            std::fs::write(temp_dir.path().join("app/.env"), "APP_KEY=x").unwrap();
            Self {
                temp_dir,
                recorder: Arc::new(RecordingEventSink::default()),
            }
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.temp_dir.path().join(rel)
        }

        fn workspace(&self) -> PathBuf {
            self.path("app/storage/backup-temp")
        }

        fn job(&self) -> BackupJob {
            BackupJob::builder()
                .backup_name("app")
                .workspace_dir(self.workspace())
                .pool(Arc::new(ThreadPoolBuilder::new().num_threads(2).build().unwrap()))
                .filename("nightly")
                .files(FileSelector::builder().include(vec![self.path("app")]).build())
                .notifier(Notifier::default().with_sink(self.recorder.clone()))
                .build()
        }

        fn destination(writer: Arc<dyn DestinationWriter>) -> Destination {
            Destination::builder().writer(writer).build()
        }

        fn database(name: &str, dumper: Arc<dyn Dumper>) -> DatabaseEntry {
            DatabaseEntry::builder().name(name).dumper(dumper).build()
        }

        fn failed_events(&self) -> Vec<BackupEvent> {
            self.recorder
                .events()
                .into_iter()
                .filter(|e| e.kind() == EventKind::JobFailed)
                .collect()
        }
    }

    fn archive_names(path: &Path) -> Vec<String> {
        let mut archive = tar::Archive::new(File::open(path).unwrap());
        let mut names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_no_destination_fails_before_any_work() {
        let fixture = Fixture::new();
        let dumper = Arc::new(FakeDumper::new("main"));
        let job = BackupJob {
            databases: vec![Fixture::database("main", dumper.clone())],
            ..fixture.job()
        };

        let error = job.run().unwrap_err();

        assert!(matches!(error, Error::NoDestinationsConfigured));
        assert!(error.is_configuration_error());
        assert!(dumper.dumps().is_empty());
        assert!(!fixture.workspace().exists());
    }

    #[test]
    fn test_successful_backup_excludes_workspace_and_local_destination() {
        let fixture = Fixture::new();
        let dumper = Arc::new(FakeDumper::new("main"));
        let disk = LocalDiskDestination::builder()
            .name("local")
            .root(fixture.path("app/storage/backups"))
            .build();
        let job = BackupJob {
            databases: vec![Fixture::database("main", dumper.clone())],
            destinations: vec![Fixture::destination(Arc::new(disk))],
            ..fixture.job()
        };

        let report = job.run().unwrap();
        let stored = fixture.path("app/storage/backups/app/nightly.tar");
        assert_eq!(report.written()[0].location(), &stored);
        assert!(report.failures().is_empty());
        assert!(!fixture.workspace().exists());
        assert_eq!(dumper.dumps().len(), 1);

        let names = archive_names(&stored);
        assert_eq!(
            names,
            vec![".env", "db-dumps/main.sql.gz", "public/index.html"]
        );
        assert_eq!(*report.archive().entry_count(), 3);

        assert_eq!(
            fixture.recorder.kinds(),
            vec![
                EventKind::DumpingDatabase,
                EventKind::ManifestCreated,
                EventKind::ArchiveCreated,
                EventKind::DestinationWriteSucceeded,
            ]
        );

        // a second run must not pick up the first archive
        let second = job.with_filename("second").run().unwrap();
        assert_eq!(*second.archive().entry_count(), 3);
    }

    #[test]
    fn test_manifest_event_lists_dumps_first() {
        let fixture = Fixture::new();
        let job = BackupJob {
            databases: vec![Fixture::database("main", Arc::new(FakeDumper::new("main")))],
            destinations: vec![Fixture::destination(Arc::new(FakeDestination::new("s3")))],
            ..fixture.job()
        };

        job.run().unwrap();

        let manifest = fixture
            .recorder
            .events()
            .into_iter()
            .find_map(|e| match e {
                BackupEvent::ManifestCreated { entry_count, files } => Some((entry_count, files)),
                _ => None,
            })
            .unwrap();
        assert_eq!(manifest.0, 3);
        assert!(manifest.1[0].ends_with("db-dumps/main.sql.gz"));
    }

    #[test]
    fn test_partial_destination_failure() {
        let fixture = Fixture::new();
        let first = Arc::new(FakeDestination::new("first"));
        let second = Arc::new(FakeDestination::failing("second"));
        let third = Arc::new(FakeDestination::new("third"));
        let job = BackupJob {
            destinations: vec![
                Fixture::destination(first.clone()),
                Fixture::destination(second.clone()),
                Fixture::destination(third.clone()),
            ],
            ..fixture.job()
        };

        let outcome = BackupOutcome::from(job.run());

        match &outcome {
            BackupOutcome::PartialFailure(report) => {
                assert_eq!(report.written().len(), 2);
                assert_eq!(report.failures()[0].disk_name(), "second");
            }
            other => panic!("Expected partial failure, got {:?}", other),
        }
        assert_eq!(outcome.exit_code(false), 0);
        assert_eq!(outcome.exit_code(true), 1);
        assert!(first.archive_seen());
        assert!(third.archive_seen());
        assert_eq!(first.written(), vec![PathBuf::from("app/nightly.tar")]);

        let failed = fixture.failed_events();
        assert_eq!(failed.len(), 1);
        assert!(matches!(
            &failed[0],
            BackupEvent::JobFailed { disk_name: Some(name), .. } if name == "second"
        ));
        assert!(!fixture.workspace().exists());
    }

    #[test]
    fn test_dump_failure_is_fatal() {
        let fixture = Fixture::new();
        let destination = Arc::new(FakeDestination::new("s3"));
        let job = BackupJob {
            databases: vec![
                Fixture::database("main", Arc::new(FakeDumper::new("main"))),
                Fixture::database("broken", Arc::new(FakeDumper::failing("broken"))),
            ],
            destinations: vec![Fixture::destination(destination.clone())],
            ..fixture.job()
        };

        let error = job.run().unwrap_err();

        assert_eq!(error.stage(), Some(JobStage::Dump));
        assert!(matches!(error.root(), Error::Dump { connection, .. } if connection == "broken"));
        assert!(error.to_string().contains("database dump"));
        assert!(destination.written().is_empty());
        assert_eq!(fixture.failed_events().len(), 1);
        assert!(!fixture.workspace().exists());
    }

    #[test]
    fn test_empty_backup_is_fatal() {
        let fixture = Fixture::new();
        let destination = Arc::new(FakeDestination::new("s3"));
        let job = BackupJob {
            files: FileSelector::default(),
            destinations: vec![Fixture::destination(destination.clone())],
            ..fixture.job()
        };

        let error = job.run().unwrap_err();

        assert!(matches!(error.root(), Error::EmptyBackup));
        assert_eq!(error.stage(), Some(JobStage::Manifest));
        assert!(destination.written().is_empty());
        assert!(!fixture.workspace().exists());
    }

    #[test]
    fn test_disabled_notifications_emit_nothing_outbound() {
        let fixture = Fixture::new();
        let job = BackupJob {
            files: FileSelector::default(),
            destinations: vec![Fixture::destination(Arc::new(FakeDestination::new("s3")))],
            ..fixture.job()
        }
        .with_notifications(false);

        assert!(job.run().is_err());
        assert!(fixture.recorder.events().is_empty());
    }

    #[test]
    fn test_only_backup_to() {
        let fixture = Fixture::new();
        let job = BackupJob {
            destinations: vec![
                Fixture::destination(Arc::new(FakeDestination::new("local"))),
                Fixture::destination(Arc::new(FakeDestination::new("s3"))),
            ],
            ..fixture.job()
        };

        let restricted = job.clone().only_backup_to("s3").unwrap();
        assert_eq!(restricted.destinations().len(), 1);
        assert_eq!(restricted.destinations()[0].disk_name(), "s3");
        assert_eq!(job.destinations().len(), 2);

        let error = job.only_backup_to("ftp").unwrap_err();
        assert!(matches!(&error, Error::DestinationNotConfigured(name) if name == "ftp"));
        assert!(error.is_configuration_error());
    }

    #[test]
    fn test_conflicting_selection() {
        let fixture = Fixture::new();
        let error = fixture
            .job()
            .only_databases()
            .unwrap()
            .only_files()
            .unwrap_err();
        assert!(matches!(error, Error::ConflictingSelection));

        let files_only = BackupJob {
            databases: vec![Fixture::database("main", Arc::new(FakeDumper::new("main")))],
            ..fixture.job()
        }
        .only_files()
        .unwrap();
        assert!(files_only.databases().is_empty());
        assert!(!files_only.files().is_empty());
    }

    #[test]
    fn test_only_connections() {
        let fixture = Fixture::new();
        let job = BackupJob {
            databases: vec![
                Fixture::database("main", Arc::new(FakeDumper::new("main"))),
                Fixture::database("logs", Arc::new(FakeDumper::new("logs"))),
            ],
            ..fixture.job()
        };

        let narrowed = job.clone().only_connections(&["logs"]).unwrap();
        assert_eq!(narrowed.databases().len(), 1);
        assert_eq!(narrowed.databases()[0].name(), "logs");
        assert!(job.only_connections(&["other"]).unwrap_err().is_configuration_error());
    }

    #[test]
    fn test_filter_is_set_once() {
        let fixture = Fixture::new();
        let reference = NaiveDate::from_ymd_opt(2024, 5, 15).unwrap();
        let job = fixture.job().with_filter_week(reference).unwrap();

        assert_eq!(job.window(), &Some(DateFilterWindow::week(reference)));
        assert_eq!(job.filter_mode(), FilterMode::Week);
        assert!(matches!(
            job.with_filter_month(reference).unwrap_err(),
            Error::FilterAlreadySet(_)
        ));
    }

    #[test]
    fn test_sanitized_marker() {
        let fixture = Fixture::new();
        let dumper = Arc::new(FakeDumper::new("main"));
        let destination = Arc::new(FakeDestination::new("s3"));
        let job = BackupJob {
            databases: vec![Fixture::database("main", dumper.clone())],
            destinations: vec![Fixture::destination(destination.clone())],
            ..fixture.job()
        };

        assert!(!job.archive_file_name("nightly").contains(SANITIZED_MARKER));
        job.clone().with_sanitized(true).run().unwrap();

        let (dump_path, request) = &dumper.dumps()[0];
        assert!(*request.sanitized());
        assert!(dump_path.ends_with("main-sanitized.sql.gz"));
        assert_eq!(
            destination.written(),
            vec![PathBuf::from("app/nightly-sanitized.tar")]
        );

        job.with_filename("plain").run().unwrap();
        let (plain_path, _) = &dumper.dumps()[1];
        assert!(!plain_path.to_string_lossy().contains(SANITIZED_MARKER));
        assert_eq!(destination.written()[1], PathBuf::from("app/plain.tar"));
    }

    #[test]
    fn test_filtered_log_dump_purges_after_successful_copy() {
        let fixture = Fixture::new();
        let reference = NaiveDate::from_ymd_opt(2024, 5, 15).unwrap();
        let logs = Arc::new(FakeDumper::new("logs").with_tables(["request_logs", "users"]));
        let settings = DumpSettings::builder()
            .log_oriented(true)
            .log_tables(vec!["request_logs".to_owned()])
            .purge_after_filtered_dump(true)
            .build();
        let archive = Arc::new(FakeDestination::new("archive"));
        let job = BackupJob {
            files: FileSelector::default(),
            databases: vec![DatabaseEntry::builder()
                .name("logs")
                .settings(settings)
                .dumper(logs.clone())
                .build()],
            destinations: vec![Destination::builder()
                .writer(archive.clone())
                .log_archive(true)
                .build()],
            ..fixture.job()
        }
        .with_filter_month(reference)
        .unwrap();

        let report = job.run().unwrap();

        assert!(report.dumps()[0].ends_with("db-dumps/2024-05.sql.gz"));
        assert_eq!(archive.written(), vec![PathBuf::from("app/monthly/nightly.tar")]);
        assert_eq!(
            logs.deletions(),
            vec![("request_logs".to_owned(), DateFilterWindow::month(reference), 42)]
        );
        assert_eq!(report.purged().len(), 1);
    }

    #[test]
    fn test_no_purge_when_every_destination_failed() {
        let fixture = Fixture::new();
        let reference = NaiveDate::from_ymd_opt(2024, 5, 15).unwrap();
        let logs = Arc::new(FakeDumper::new("logs").with_tables(["request_logs"]));
        let settings = DumpSettings::builder()
            .log_oriented(true)
            .log_tables(vec!["request_logs".to_owned()])
            .purge_after_filtered_dump(true)
            .build();
        let job = BackupJob {
            databases: vec![DatabaseEntry::builder()
                .name("logs")
                .settings(settings)
                .dumper(logs.clone())
                .build()],
            destinations: vec![Fixture::destination(Arc::new(FakeDestination::failing("s3")))],
            ..fixture.job()
        }
        .with_filter_week(reference)
        .unwrap();

        let outcome = BackupOutcome::from(job.run());
        assert!(matches!(outcome, BackupOutcome::PartialFailure(_)));
        assert!(logs.deletions().is_empty());
    }

    #[test]
    fn test_purge_skipped_without_dump_high_water_mark() {
        let fixture = Fixture::new();
        let reference = NaiveDate::from_ymd_opt(2024, 5, 15).unwrap();
        let logs = Arc::new(
            FakeDumper::new("logs")
                .with_tables(["request_logs"])
                .without_rowids(),
        );
        let settings = DumpSettings::builder()
            .log_oriented(true)
            .log_tables(vec!["request_logs".to_owned()])
            .purge_after_filtered_dump(true)
            .build();
        let job = BackupJob {
            databases: vec![DatabaseEntry::builder()
                .name("logs")
                .settings(settings)
                .dumper(logs.clone())
                .build()],
            destinations: vec![Fixture::destination(Arc::new(FakeDestination::new("s3")))],
            ..fixture.job()
        }
        .with_filter_month(reference)
        .unwrap();

        let report = job.run().unwrap();
        assert_eq!(report.written().len(), 1);
        assert!(logs.deletions().is_empty());
        assert!(report.purged().is_empty());
    }

    #[test]
    fn test_unsafe_filename_is_rejected_before_any_work() {
        let fixture = Fixture::new();
        let dumper = Arc::new(FakeDumper::new("main"));
        let destination = Arc::new(FakeDestination::new("s3"));
        let job = BackupJob {
            databases: vec![Fixture::database("main", dumper.clone())],
            destinations: vec![Fixture::destination(destination.clone())],
            ..fixture.job()
        };

        for name in ["../escaped", "../../escaped", "nested/name", ".."] {
            let error = job.clone().with_filename(name).run().unwrap_err();
            assert!(error.is_configuration_error(), "{name:?} accepted");
        }
        assert!(dumper.dumps().is_empty());
        assert!(destination.written().is_empty());
        assert!(!fixture.workspace().exists());
        assert!(!fixture.path("app/storage/escaped.tar").exists());
        assert!(!fixture.path("app/escaped.tar").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_into_workspace_and_destination_are_not_archived() {
        let fixture = Fixture::new();
        let disk = LocalDiskDestination::builder()
            .name("local")
            .root(fixture.path("backups"))
            .build();
        std::os::unix::fs::symlink(fixture.path("scratch"), fixture.path("app/link")).unwrap();
        std::os::unix::fs::symlink(fixture.path("backups"), fixture.path("app/archives")).unwrap();
        let job = BackupJob {
            workspace_dir: fixture.path("scratch"),
            files: FileSelector::builder()
                .include(vec![fixture.path("app")])
                .follow_links(true)
                .build(),
            databases: vec![Fixture::database("main", Arc::new(FakeDumper::new("main")))],
            destinations: vec![Fixture::destination(Arc::new(disk))],
            ..fixture.job()
        };

        job.run().unwrap();
        job.clone().with_filename("second").run().unwrap();

        let stored = fixture.path("backups/app/second.tar");
        assert_eq!(
            archive_names(&stored),
            vec![".env", "db-dumps/main.sql.gz", "public/index.html"]
        );
        assert!(!fixture.path("scratch").exists());
    }

    #[test]
    fn test_default_filename_is_timestamp() {
        let fixture = Fixture::new();
        let destination = Arc::new(FakeDestination::new("s3"));
        let job = BackupJob {
            filename: None,
            destinations: vec![Fixture::destination(destination.clone())],
            ..fixture.job()
        };

        job.run().unwrap();

        let stored = destination.written()[0].clone();
        let stem = stored.file_name().unwrap().to_str().unwrap().trim_end_matches(".tar");
        assert!(NaiveDateTime::parse_from_str(stem, TIME_FORMAT).is_ok());
    }
}
