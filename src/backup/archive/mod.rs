use crate::backup::compress::{CompressorBuilder, CompressorConfig};
use crate::backup::file_ext::FileExtProvider;
use crate::backup::finish::Finish;
use crate::backup::function_path;
use crate::backup::manifest::Manifest;
use crate::backup::path::common_ancestor;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use bon::Builder;
use function_name::named;
use getset::Getters;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, IntoInnerError};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

static TAR_FILE_EXT: &str = "tar";

/// One file going into the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Source file on disk
    pub src: Arc<Path>,
    /// Relative path inside the archive
    pub dst: Arc<Path>,
}

impl ArchiveEntry {
    pub fn new<A: Into<Arc<Path>>, B: Into<Arc<Path>>>(src: A, dst: B) -> ArchiveEntry {
        Self {
            src: src.into(),
            dst: dst.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct ArchiveSummary {
    path: PathBuf,
    size: u64,
    entry_count: usize,
}

/// Streams manifest entries into a single compressed tar file.
///
/// Entries that live in the workspace (database dumps) are stored relative
/// to it; every other entry is stored relative to the deepest directory
/// shared by all of them.
#[derive(Clone, Debug, Builder, Getters)]
#[getset(get = "pub")]
pub struct ArchiveWriter {
    #[builder(into)]
    workspace: PathBuf,
    #[builder(default)]
    compressor: CompressorConfig,
}

impl FileExtProvider for ArchiveWriter {
    fn file_ext(&self) -> Option<&'static str> {
        match self.compressor.file_ext() {
            None => Some(TAR_FILE_EXT),
            Some("gz") => Some("tar.gz"),
            Some("xz") => Some("tar.xz"),
            Some(_) => Some(TAR_FILE_EXT),
        }
    }
}

impl ArchiveWriter {
    /// True for a path outside the workspace that still resolves into it.
    fn reaches_workspace(&self, src: &Path, resolved_workspace: Option<&Path>) -> bool {
        if src.starts_with(&self.workspace) {
            return false;
        }
        match (resolved_workspace, src.canonicalize()) {
            (Some(workspace), Ok(target)) => target.starts_with(workspace),
            _ => false,
        }
    }

    /// Resolves where every manifest path lands inside the archive.
    ///
    /// Directories are expanded file by file without following directory
    /// symlinks. Paths that vanished since the manifest was built, unreadable
    /// directory members, and anything resolving into the workspace from
    /// outside it are skipped.
    pub fn archive_entries(&self, manifest: &Manifest) -> Vec<ArchiveEntry> {
        let resolved_workspace = self.workspace.canonicalize().ok();
        let resolved_workspace = resolved_workspace.as_deref();
        let base = common_ancestor(
            manifest
                .files()
                .iter()
                .filter(|p| !p.starts_with(&self.workspace))
                .map(PathBuf::as_path),
        );

        let mut entries = Vec::new();
        for src in manifest.files().iter() {
            let Ok(metadata) = std::fs::metadata(src) else {
                tracing::warn!("Manifest entry {:?} no longer exists, skipping", src);
                continue;
            };
            if self.reaches_workspace(src, resolved_workspace) {
                tracing::warn!("Manifest entry {:?} resolves into the workspace, skipping", src);
                continue;
            }
            let dst = self.relative_dst(src, base.as_deref());

            if metadata.is_dir() {
                for res in WalkDir::new(src) {
                    match res {
                        Ok(de) if de.path_is_symlink() && !de.path().is_file() => {}
                        Ok(de) if self.reaches_workspace(de.path(), resolved_workspace) => {
                            tracing::warn!("Skipping {:?}, it resolves into the workspace", de.path());
                        }
                        Ok(de) if de.path().is_file() => match de.path().strip_prefix(src) {
                            Ok(rel) => entries.push(ArchiveEntry::new(de.path(), dst.join(rel))),
                            Err(e) => tracing::warn!("Skipping {:?}: {}", de.path(), e),
                        },
                        Ok(_) => {}
                        Err(e) => tracing::warn!("Skipping unreadable path: {}", e),
                    }
                }
            } else {
                entries.push(ArchiveEntry::new(src.as_path(), dst));
            }
        }
        entries
    }

    fn relative_dst(&self, src: &Path, base: Option<&Path>) -> PathBuf {
        let stripped = src
            .strip_prefix(&self.workspace)
            .ok()
            .or_else(|| base.and_then(|b| src.strip_prefix(b).ok()));
        match stripped {
            Some(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
            _ => src
                .components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .collect(),
        }
    }

    /// Writes the archive to `archive_path`, which must not exist yet.
    #[named]
    pub fn write(&self, manifest: &Manifest, archive_path: &Path) -> Result<ArchiveSummary> {
        tracing::info!(
            "Creating archive {:?} from {} manifest entries",
            archive_path,
            manifest.count()
        );
        let mut writer = File::create_new(archive_path)
            .map(BufWriter::new)
            .map_err(Error::from)
            .and_then(|f| self.compressor.build_compressor(f))
            .map(BufWriter::new)
            .map(tar::Builder::new)
            .add_fn_name(function_path!())?;

        let mut added = HashSet::new();
        let mut entry_count = 0usize;
        for entry in self.archive_entries(manifest) {
            if !added.insert(entry.src.clone()) {
                continue;
            }
            let mut file = match File::open(&entry.src) {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!("Skipping unreadable file {:?}: {}", entry.src, e);
                    continue;
                }
            };
            tracing::trace!("Adding {:?} as {:?}", entry.src, entry.dst);
            writer
                .append_file(entry.dst.as_ref(), &mut file)
                .map_err(Error::from)
                .add_msg(format!("Adding {:?} to archive failed", entry.src))?;
            entry_count += 1;
        }

        writer
            .into_inner()?
            .into_inner()
            .map_err(IntoInnerError::into_error)?
            .finish()?
            .into_inner()
            .map_err(IntoInnerError::into_error)?
            .sync_all()?;

        let size = std::fs::metadata(archive_path)?.len();
        tracing::info!(
            "Archive {:?} created with {} entries, {} bytes",
            archive_path,
            entry_count,
            size
        );
        Ok(ArchiveSummary {
            path: archive_path.to_path_buf(),
            size,
            entry_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::compress::xz::XzConfig;
    use crate::backup::manifest::ManifestBuilder;
    use liblzma::read::XzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn manifest_of(dir: &Path, files: &[PathBuf]) -> Manifest {
        let mut builder = ManifestBuilder::new(dir.join("manifest.txt"));
        builder.add_files(files).unwrap();
        builder.build().unwrap()
    }

    fn extract<R: Read>(reader: R, out: &Path) -> Vec<PathBuf> {
        std::fs::create_dir_all(out).unwrap();
        let mut archive = tar::Archive::new(reader);
        let mut names = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            names.push(entry.path().unwrap().to_path_buf());
            entry.unpack_in(out).unwrap();
        }
        names.sort();
        names
    }

    #[test]
    fn test_round_trip_two_files() {
        let temp_dir = TempDir::new().unwrap();
        let workspace = temp_dir.path().join("workspace");
        let src = temp_dir.path().join("src");
        std::fs::create_dir_all(&workspace).unwrap();
        std::fs::create_dir_all(src.join("docs")).unwrap();
        std::fs::write(src.join("a.sql"), "INSERT INTO t VALUES (1);").unwrap();
        std::fs::write(src.join("docs/b.txt"), vec![0u8, 159, 146, 150]).unwrap();

        let manifest = manifest_of(&workspace, &[src.join("a.sql"), src.join("docs/b.txt")]);
        let writer = ArchiveWriter::builder().workspace(&workspace).build();
        let archive_path = workspace.join("backup.tar");
        let summary = writer.write(&manifest, &archive_path).unwrap();

        assert_eq!(summary.entry_count(), &2);
        assert!(*summary.size() > 0);

        let out = temp_dir.path().join("out");
        let names = extract(File::open(&archive_path).unwrap(), &out);
        assert_eq!(names, vec![PathBuf::from("a.sql"), PathBuf::from("docs/b.txt")]);
        assert_eq!(
            std::fs::read(out.join("a.sql")).unwrap(),
            std::fs::read(src.join("a.sql")).unwrap()
        );
        assert_eq!(
            std::fs::read(out.join("docs/b.txt")).unwrap(),
            std::fs::read(src.join("docs/b.txt")).unwrap()
        );
    }

    #[test]
    fn test_directories_recursed_and_dumps_under_workspace() {
        let temp_dir = TempDir::new().unwrap();
        let workspace = temp_dir.path().join("workspace");
        let public = temp_dir.path().join("app/public");
        std::fs::create_dir_all(workspace.join("db-dumps")).unwrap();
        std::fs::create_dir_all(public.join("img")).unwrap();
        std::fs::write(workspace.join("db-dumps/main.sql"), "dump").unwrap();
        std::fs::write(public.join("index.html"), "<html>").unwrap();
        std::fs::write(public.join("img/logo.png"), "png").unwrap();

        let manifest = manifest_of(&workspace, &[workspace.join("db-dumps/main.sql"), public.clone()]);
        let writer = ArchiveWriter::builder()
            .workspace(&workspace)
            .compressor(CompressorConfig::Xz(XzConfig::default()))
            .build();
        assert_eq!(writer.file_ext(), Some("tar.xz"));

        let archive_path = workspace.join("backup.tar.xz");
        let summary = writer.write(&manifest, &archive_path).unwrap();
        assert_eq!(summary.entry_count(), &3);

        let out = temp_dir.path().join("out");
        let names = extract(XzDecoder::new(File::open(&archive_path).unwrap()), &out);
        assert_eq!(
            names,
            vec![
                PathBuf::from("db-dumps/main.sql"),
                PathBuf::from("public/img/logo.png"),
                PathBuf::from("public/index.html"),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_links_into_workspace_are_not_archived() {
        let temp_dir = TempDir::new().unwrap();
        let workspace = temp_dir.path().join("workspace");
        let app = temp_dir.path().join("app");
        std::fs::create_dir_all(workspace.join("db-dumps")).unwrap();
        std::fs::create_dir_all(&app).unwrap();
        std::fs::write(workspace.join("db-dumps/main.sql"), "dump").unwrap();
        std::fs::write(app.join("index.php"), "<?php").unwrap();
        std::os::unix::fs::symlink(&workspace, app.join("scratch")).unwrap();
        std::os::unix::fs::symlink(workspace.join("db-dumps/main.sql"), app.join("main.sql")).unwrap();
        std::os::unix::fs::symlink(&workspace, temp_dir.path().join("ws-link")).unwrap();

        let manifest = manifest_of(
            &workspace,
            &[
                workspace.join("db-dumps/main.sql"),
                app.clone(),
                temp_dir.path().join("ws-link"),
            ],
        );
        let writer = ArchiveWriter::builder().workspace(&workspace).build();
        let archive_path = workspace.join("backup.tar");
        let summary = writer.write(&manifest, &archive_path).unwrap();
        assert_eq!(summary.entry_count(), &2);

        let out = temp_dir.path().join("out");
        let names = extract(File::open(&archive_path).unwrap(), &out);
        assert_eq!(
            names,
            vec![PathBuf::from("app/index.php"), PathBuf::from("db-dumps/main.sql")]
        );
    }

    #[test]
    fn test_vanished_entry_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let kept = temp_dir.path().join("kept.txt");
        let gone = temp_dir.path().join("gone.txt");
        std::fs::write(&kept, "kept").unwrap();
        std::fs::write(&gone, "gone").unwrap();
        let manifest = manifest_of(temp_dir.path(), &[kept.clone(), gone.clone()]);
        std::fs::remove_file(&gone).unwrap();

        let writer = ArchiveWriter::builder().workspace(temp_dir.path().join("ws")).build();
        let summary = writer
            .write(&manifest, &temp_dir.path().join("out.tar"))
            .unwrap();
        assert_eq!(summary.entry_count(), &1);
    }

    #[test]
    fn test_existing_archive_is_not_overwritten() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("a.txt");
        std::fs::write(&file, "a").unwrap();
        let archive_path = temp_dir.path().join("out.tar");
        std::fs::write(&archive_path, "already here").unwrap();

        let manifest = manifest_of(temp_dir.path(), &[file]);
        let writer = ArchiveWriter::builder().workspace(temp_dir.path().join("ws")).build();
        assert!(writer.write(&manifest, &archive_path).is_err());
        assert_eq!(std::fs::read_to_string(&archive_path).unwrap(), "already here");
    }
}
