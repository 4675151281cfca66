use crate::backup::result_error::{AddDebugObjectAndFnName, AddFunctionName, AddMsg};
use derive_more::Display;
use itertools::Itertools;
use std::fmt::Debug;
use thiserror::Error;

/// Pipeline stage reported when a job fails fatally.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum JobStage {
    #[display("workspace preparation")]
    Workspace,
    #[display("database dump")]
    Dump,
    #[display("file selection")]
    Selection,
    #[display("manifest creation")]
    Manifest,
    #[display("archive creation")]
    Archive,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Rusqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    LiblzmaStream(#[from] liblzma::stream::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    ThreadPoolBuildError(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error(transparent)]
    Glob(#[from] globset::Error),
    #[error(transparent)]
    LettreMessage(#[from] lettre::error::Error),
    #[error(transparent)]
    LettreSmtp(#[from] lettre::transport::smtp::Error),
    #[error("smtp server rejected message: {0}")]
    SmtpSendError(String),
    #[error("no backup destination configured")]
    NoDestinationsConfigured,
    #[error("backup destination {0:?} is not configured")]
    DestinationNotConfigured(String),
    #[error("cannot back up only databases and only files at the same time")]
    ConflictingSelection,
    #[error("date filter already set to {0}")]
    FilterAlreadySet(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("dumping connection {connection:?} failed:\n{}", indent::indent_all_with("  ", error.to_string()))]
    Dump { connection: String, error: Box<Error> },
    #[error("nothing to back up, manifest is empty")]
    EmptyBackup,
    #[error("writing backup to destination {disk_name:?} failed:\n{}", indent::indent_all_with("  ", error.to_string()))]
    DestinationWrite { disk_name: String, error: Box<Error> },
    #[error("backup failed during {stage}:\n{}", indent::indent_all_with("  ", error.to_string()))]
    Stage { stage: JobStage, error: Box<Error> },
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{}:\n{}", fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithFnName { fn_name: String, error: Box<Error> },
    #[error("{:?} {} failed:\n{}", obj_debug, fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithDebugObjAndFnName {
        error: Box<Error>,
        obj_debug: Box<dyn Debug + Send + Sync>,
        fn_name: String,
    },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

impl<S: Into<String>, O: Debug + Send + Sync + 'static> AddDebugObjectAndFnName<S, O> for Error {
    fn add_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        Error::WithDebugObjAndFnName {
            error: Box::new(self),
            obj_debug: Box::new(obj),
            fn_name: fn_name.into(),
        }
    }
}

impl<S: Into<String>> AddMsg<S> for Error {
    fn add_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl<S: Into<String>> AddFunctionName<S> for Error {
    fn add_fn_name(self, fn_name: S) -> Self {
        Self::WithFnName {
            fn_name: fn_name.into(),
            error: Box::new(self),
        }
    }
}

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        Self::lots_of_error(errors)
    }
}

impl Error {
    pub fn lots_of_error(errors: Vec<Error>) -> Error {
        Self::LotsOfError(errors.into_iter().flat_map(Error::into_iter).collect_vec())
    }

    pub fn smtp_send_error<S: Into<String>>(msg: S) -> Error {
        Self::SmtpSendError(msg.into())
    }

    pub fn in_stage(self, stage: JobStage) -> Error {
        match self {
            e @ Error::Stage { .. } => e,
            e => Error::Stage {
                stage,
                error: Box::new(e),
            },
        }
    }

    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(Error::into_iter)),
            e => Box::new(std::iter::once(e)),
        }
    }

    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }

    /// Strips context wrappers down to the error that caused them.
    pub fn root(&self) -> &Error {
        match self {
            Error::WithMsg { error, .. }
            | Error::WithFnName { error, .. }
            | Error::WithDebugObjAndFnName { error, .. }
            | Error::Stage { error, .. } => error.root(),
            e => e,
        }
    }

    /// Errors raised by a bad job setup before any side effect happened.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self.root(),
            Error::NoDestinationsConfigured
                | Error::DestinationNotConfigured(_)
                | Error::ConflictingSelection
                | Error::FilterAlreadySet(_)
                | Error::InvalidConfiguration(_)
                | Error::ValidationError(_)
        )
    }

    pub fn stage(&self) -> Option<JobStage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            Error::WithMsg { error, .. }
            | Error::WithFnName { error, .. }
            | Error::WithDebugObjAndFnName { error, .. } => error.stage(),
            _ => None,
        }
    }
}
