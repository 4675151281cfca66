//! Lexical path helpers shared by selection, manifest and archive code.

use crate::backup::result_error::result::Result;
use std::path::{Component, Path, PathBuf};

/// Makes `path` absolute and resolves `.`/`..` without touching the filesystem.
///
/// Symlinks are left alone, so two spellings of the same target through
/// different links stay distinct.
pub fn normalize_path<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let absolute = std::path::absolute(path.as_ref())?;
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            c => normalized.push(c.as_os_str()),
        }
    }
    Ok(normalized)
}

/// Deepest directory that contains every given path.
pub fn common_ancestor<'a, I: IntoIterator<Item = &'a Path>>(paths: I) -> Option<PathBuf> {
    let mut iter = paths.into_iter();
    let first = iter.next()?;
    let mut ancestor = first.parent().unwrap_or(first).to_path_buf();
    for path in iter {
        while !path.starts_with(&ancestor) {
            if !ancestor.pop() {
                return None;
            }
        }
    }
    Some(ancestor)
}
