use crate::backup::path::normalize_path;
use crate::backup::result_error::result::Result;
use getset::Getters;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, IntoInnerError, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub static MANIFEST_FILE_NAME: &str = "manifest.txt";

/// Collects archive candidates in insertion order, dropping repeats.
#[derive(Debug)]
pub struct ManifestBuilder {
    path: PathBuf,
    files: Vec<PathBuf>,
    seen: HashSet<PathBuf>,
}

/// The persisted, immutable list of paths that go into one archive.
#[derive(Clone, Debug, Getters)]
#[getset(get = "pub")]
pub struct Manifest {
    path: PathBuf,
    files: Arc<[PathBuf]>,
}

impl ManifestBuilder {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            files: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Adds one path; returns `false` when it was already present.
    pub fn add<P: AsRef<Path>>(&mut self, file: P) -> Result<bool> {
        let file = normalize_path(file)?;
        if self.seen.contains(&file) {
            tracing::trace!("Skipping duplicate manifest entry {:?}", file);
            return Ok(false);
        }
        self.seen.insert(file.clone());
        self.files.push(file);
        Ok(true)
    }

    pub fn add_files<P: AsRef<Path>, I: IntoIterator<Item = P>>(&mut self, files: I) -> Result<usize> {
        let mut added = 0;
        for file in files {
            if self.add(file)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Writes one path per line and freezes the manifest.
    pub fn build(self) -> Result<Manifest> {
        let mut writer = BufWriter::new(File::create(&self.path)?);
        for file in &self.files {
            match file.to_str() {
                Some(s) => writeln!(writer, "{s}")?,
                None => {
                    tracing::warn!("Manifest entry {:?} is not valid UTF-8", file);
                    writeln!(writer, "{}", file.to_string_lossy())?
                }
            }
        }
        writer
            .into_inner()
            .map_err(IntoInnerError::into_error)?
            .sync_all()?;

        tracing::info!("Manifest {:?} contains {} entries", self.path, self.files.len());
        Ok(Manifest {
            path: self.path,
            files: self.files.into(),
        })
    }
}

impl Manifest {
    pub fn count(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
