use crate::backup::path::normalize_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use std::path::{Path, PathBuf};

/// Scratch directory exclusively owned by one job run.
///
/// Emptied on creation and removed when dropped, so every exit path of a
/// run, including unwinding, leaves nothing behind.
#[derive(Debug)]
pub struct TemporaryWorkspace {
    path: PathBuf,
}

impl TemporaryWorkspace {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = normalize_path(path)?;
        if path.exists() {
            tracing::debug!("Emptying leftover workspace {:?}", path);
            std::fs::remove_dir_all(&path)
                .map_err(Error::from)
                .add_msg(format!("Emptying workspace {:?} failed", path))?;
        }
        std::fs::create_dir_all(&path)
            .map_err(Error::from)
            .add_msg(format!("Creating workspace {:?} failed", path))?;
        tracing::info!("Created temporary workspace {:?}", path);
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join<P: AsRef<Path>>(&self, rel: P) -> PathBuf {
        self.path.join(rel)
    }

    /// Creates (if needed) and returns a sub-directory of the workspace.
    pub fn sub_dir<P: AsRef<Path>>(&self, rel: P) -> Result<PathBuf> {
        let dir = self.path.join(rel);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

impl Drop for TemporaryWorkspace {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => tracing::info!("Removed temporary workspace {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::error!("Removing temporary workspace {:?} failed: {}", self.path, e),
        }
    }
}
