//! `validator` custom functions shared by the configuration structs.

use rusqlite::{Connection, OpenFlags};
use sanitize_filename::{is_sanitized, sanitize};
use std::borrow::Cow;
use std::path::Path;
use validator::ValidationError;

type Validation = Result<(), ValidationError>;

fn invalid(code: &'static str, message: String) -> ValidationError {
    ValidationError::new(code).with_message(Cow::Owned(message))
}

/// Empty is allowed; anything else must already be a safe file name fragment.
pub fn validate_valid_archive_prefix<S: AsRef<str>>(prefix: S) -> Validation {
    let prefix = prefix.as_ref();
    match prefix.is_empty() || is_sanitized(prefix) {
        true => Ok(()),
        false => Err(invalid(
            "InvalidArchivePrefix",
            format!("archive prefix {prefix:?} is not a safe file name, e.g. {:?}", sanitize(prefix)),
        )),
    }
}

/// Archive stem given on the command line; must stay a single file name.
pub fn validate_archive_stem<S: AsRef<str>>(stem: S) -> Validation {
    let stem = stem.as_ref();
    match !stem.is_empty() && is_sanitized(stem) {
        true => Ok(()),
        false => Err(invalid(
            "InvalidArchiveName",
            format!("archive name {stem:?} is not a plain file name, e.g. {:?}", sanitize(stem)),
        )),
    }
}

/// Names a directory under each destination root, so it must be a single path component.
pub fn validate_valid_storage_name<S: AsRef<str>>(name: S) -> Validation {
    let name = name.as_ref();
    match !name.is_empty() && is_sanitized(name) {
        true => Ok(()),
        false => Err(invalid("InvalidStorageName", format!("invalid storage name {name:?}"))),
    }
}

/// Creates the directory when missing, then checks it is not read-only.
pub fn validate_writable_dir<P: AsRef<Path>>(dir: P) -> Validation {
    let dir = dir.as_ref();
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| {
            invalid("InvalidDirectory", format!("cannot create directory {dir:?}: {e}"))
        })?;
    }
    let metadata = std::fs::metadata(dir)
        .map_err(|e| invalid("InvalidDirectory", format!("cannot stat {dir:?}: {e}")))?;
    if !metadata.is_dir() {
        return Err(invalid("InvalidDirectory", format!("{dir:?} is not a directory")));
    }
    if metadata.permissions().readonly() {
        return Err(invalid("InvalidDirectory", format!("{dir:?} is read-only")));
    }
    Ok(())
}

pub fn validate_sql_file<P: AsRef<Path>>(path: P) -> Validation {
    let path = path.as_ref();
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    Connection::open_with_flags(path, flags)
        .map(drop)
        .map_err(|e| invalid("InvalidSqlFile", format!("cannot open database {path:?}: {e}")))
}
