//! # db_file_backup
//!
//! Backs up an application's databases and files into a single archive and
//! copies it to one or more storage destinations.
//!
//! ## Features
//!
//! - **Database dumps**: SQLite connections dumped as SQL text, optionally
//!   sanitized or restricted to a weekly/monthly window of log rows
//! - **File selection**: included roots minus excluded roots and glob patterns
//! - **Compression**: gzip or XZ (LZMA) for dumps and archives
//! - **Destinations**: parallel, isolated copies with partial failure reporting
//! - **Notifications**: lifecycle events logged and optionally mailed over SMTP
//!
//! ## Quick Start
//!
//! ```no_run
//! use db_file_backup::backup::backup_config::BackupConfig;
//! use db_file_backup::backup::job::outcome::BackupOutcome;
//! use validator::Validate;
//!
//! let config: BackupConfig = serde_yml::from_reader(std::fs::File::open("config.yml")?)?;
//! config.validate()?;
//!
//! let thread_pool = config.thread_pool()?;
//! let job = config.build_job(std::sync::Arc::new(thread_pool))?;
//! let outcome = BackupOutcome::from(job.run());
//! std::process::exit(outcome.exit_code(false).into());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
