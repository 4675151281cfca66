use chrono::{Local, NaiveDate};
use clap::{Parser, ValueEnum};
use db_file_backup::backup::backup_config::BackupConfig;
use db_file_backup::backup::dump::window::FilterMode;
use db_file_backup::backup::job::outcome::BackupOutcome;
use db_file_backup::backup::job::BackupJob;
use db_file_backup::backup::result_error::error::Error;
use db_file_backup::backup::result_error::result::Result;
use db_file_backup::backup::result_error::AddMsg;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use validator::Validate;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Filter {
    Week,
    Month,
}

impl From<Filter> for FilterMode {
    fn from(value: Filter) -> Self {
        match value {
            Filter::Week => FilterMode::Week,
            Filter::Month => FilterMode::Month,
        }
    }
}

/// Dump databases, archive them with application files and copy the archive to every destination
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long)]
    config: PathBuf,
    /// Back up databases only
    #[arg(long)]
    only_db: bool,
    /// Back up files only
    #[arg(long)]
    only_files: bool,
    /// Write to this destination only
    #[arg(long, value_name = "DISK")]
    only_to_disk: Option<String>,
    /// Restrict log-oriented connections to the week or month around the reference date
    #[arg(long)]
    filter: Option<Filter>,
    /// Reference date for --filter, defaults to today
    #[arg(long, value_name = "YYYY-MM-DD")]
    reference_date: Option<NaiveDate>,
    /// Archive file stem instead of the current timestamp
    #[arg(long)]
    filename: Option<String>,
    /// Apply sanitize rules to database dumps
    #[arg(long)]
    sanitized: bool,
    /// Do not send outbound notifications
    #[arg(long)]
    disable_notifications: bool,
    /// Exit with failure when some destinations could not be written
    #[arg(long)]
    fail_on_partial: bool,
}

fn load_config(path: &Path) -> Result<BackupConfig> {
    let config = File::open(path)
        .map_err(Error::from)
        .and_then(|f| {
            serde_yml::from_reader::<_, BackupConfig>(f)
                .map_err(Error::from)
                .add_msg(format!("Parse YAML config failed: {:?}", path))
        })?;
    config
        .validate()
        .map_err(Error::from)
        .add_msg(format!("Config validation failed: {:?}", path))?;
    Ok(config)
}

fn configure_job(args: &Args, config: &BackupConfig) -> Result<BackupJob> {
    let pool = config.thread_pool()?;
    let mut job = config.build_job(Arc::new(pool))?;

    if args.only_db {
        job = job.only_databases()?;
    }
    if args.only_files {
        job = job.only_files()?;
    }
    if let Some(disk) = &args.only_to_disk {
        job = job.only_backup_to(disk)?;
    }
    match (args.filter, args.reference_date) {
        (Some(filter), reference) => {
            let reference = reference.unwrap_or_else(|| Local::now().date_naive());
            job = job.with_filter(filter.into(), reference)?;
        }
        (None, Some(_)) => warn!("--reference-date has no effect without --filter"),
        (None, None) => {}
    }
    if let Some(filename) = &args.filename {
        job = job.with_filename(filename.as_str());
    }
    Ok(job
        .with_sanitized(args.sanitized)
        .with_notifications(!args.disable_notifications))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let outcome: BackupOutcome = load_config(&args.config)
        .and_then(|config| configure_job(&args, &config))
        .and_then(|job| job.run())
        .into();

    match &outcome {
        BackupOutcome::Success(report) => {
            info!("Backup stored at {} destinations", report.written().len())
        }
        BackupOutcome::PartialFailure(report) => {
            for failure in report.failures() {
                warn!("{}", failure.error());
            }
        }
        BackupOutcome::Fatal(e) => error!("{e}"),
    }

    ExitCode::from(outcome.exit_code(args.fail_on_partial))
}
