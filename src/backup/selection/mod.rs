pub mod glob;

use crate::backup::function_path;
use crate::backup::path::normalize_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::selection::glob::{build_globset, ExcludePattern};

use bon::Builder;
use dyn_iter::{DynIter, IntoDynIterator};
use function_name::named;
use getset::Getters;
use globset::GlobSet;
use serde::{Deserialize, Serialize};
use validator::Validate;
use walkdir::{DirEntry, WalkDir};

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Include roots plus exclusion rules for the non-database part of a backup.
///
/// Exclusions always win over inclusions and are evaluated on absolute,
/// lexically normalized paths, component by component, so excluding
/// `/var/www` never hides `/var/www2`.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, PartialEq, Eq, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct FileSelector {
    #[serde(default)]
    #[builder(default, into)]
    include: Vec<PathBuf>,
    #[serde(default)]
    #[builder(default, into)]
    exclude: Vec<PathBuf>,
    #[serde(default)]
    #[builder(default, into)]
    exclude_patterns: Vec<ExcludePattern>,
    #[serde(default)]
    #[builder(default)]
    follow_links: bool,
    #[serde(default = "default_ignore_unreadable_dirs")]
    #[builder(default = default_ignore_unreadable_dirs())]
    ignore_unreadable_dirs: bool,
}

fn default_ignore_unreadable_dirs() -> bool {
    true
}

impl Default for FileSelector {
    fn default() -> Self {
        FileSelector::builder().build()
    }
}

#[derive(Clone)]
struct ExclusionMatcher {
    roots: Arc<[PathBuf]>,
    /// Excluded roots after symlink resolution, for those that exist.
    resolved_roots: Arc<[PathBuf]>,
    patterns: Arc<GlobSet>,
}

impl ExclusionMatcher {
    fn is_excluded(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| path.starts_with(root)) || self.patterns.is_match(path)
    }

    /// True when `path` reaches an excluded location through a symlink.
    fn resolves_into_excluded(&self, path: &Path) -> bool {
        let Ok(target) = path.canonicalize() else {
            return false;
        };
        self.resolved_roots.iter().any(|root| target.starts_with(root))
            || (target.as_path() != path && self.is_excluded(&target))
    }

    fn rejects(&self, de: &DirEntry) -> bool {
        if self.is_excluded(de.path()) {
            return true;
        }
        (de.path_is_symlink() || de.file_type().is_dir()) && self.resolves_into_excluded(de.path())
    }
}

impl FileSelector {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
    }

    /// Returns a copy of this selector with extra excluded roots.
    pub fn with_excluded<P: AsRef<Path>, I: IntoIterator<Item = P>>(&self, extra: I) -> Self {
        let mut selector = self.clone();
        selector
            .exclude
            .extend(extra.into_iter().map(|p| p.as_ref().to_path_buf()));
        selector
    }

    fn exclusion_matcher(&self) -> Result<ExclusionMatcher> {
        let roots = self
            .exclude
            .iter()
            .map(normalize_path)
            .collect::<Result<Vec<_>>>()?;
        let resolved_roots = roots
            .iter()
            .filter_map(|root| root.canonicalize().ok())
            .collect::<Vec<_>>();
        Ok(ExclusionMatcher {
            roots: roots.into(),
            resolved_roots: resolved_roots.into(),
            patterns: Arc::new(build_globset(&self.exclude_patterns)?),
        })
    }

    /// Lazily resolves every selected file.
    ///
    /// Included directories are always walked. A symlink, or a directory
    /// reached through one, is dropped when it resolves into an excluded root.
    #[named]
    pub fn selected_paths<'a>(&self) -> Result<DynIter<'a, Result<PathBuf>>> {
        let matcher = self.exclusion_matcher()?;
        let includes = self
            .include
            .iter()
            .map(normalize_path)
            .collect::<Result<Vec<_>>>()?;
        tracing::info!(
            "Selecting files from {} roots with {} excluded roots and {} patterns",
            includes.len(),
            matcher.roots.len(),
            self.exclude_patterns.len()
        );

        let follow_links = self.follow_links;
        let ignore_unreadable_dirs = self.ignore_unreadable_dirs;
        let iter = includes.into_iter().flat_map(move |root| {
            select_root(root, matcher.clone(), follow_links, ignore_unreadable_dirs)
                .map(|res| res.add_fn_name(function_path!()))
        });

        Ok(iter.into_dyn_iter())
    }
}

fn select_root<'a>(
    root: PathBuf,
    matcher: ExclusionMatcher,
    follow_links: bool,
    ignore_unreadable_dirs: bool,
) -> DynIter<'a, Result<PathBuf>> {
    if matcher.is_excluded(&root) || matcher.resolves_into_excluded(&root) {
        tracing::debug!("Skipping excluded root {:?}", root);
        return std::iter::empty().into_dyn_iter();
    }
    if !root.exists() {
        tracing::warn!("Included path {:?} does not exist, skipping", root);
        return std::iter::empty().into_dyn_iter();
    }
    if !root.is_dir() {
        return std::iter::once(Ok(root)).into_dyn_iter();
    }

    WalkDir::new(&root)
        .follow_links(follow_links)
        .into_iter()
        .filter_entry(move |de| {
            let rejected = matcher.rejects(de);
            if rejected {
                tracing::debug!("Skipping excluded path {:?}", de.path());
            }
            !rejected
        })
        .filter_map(move |res| match res {
            Ok(de) => process_dir_entry(de),
            Err(e) if ignore_unreadable_dirs => {
                tracing::warn!("Ignoring unreadable path: {}", e);
                None
            }
            Err(e) => Some(Err(Error::from(e).add_msg(format!("Walking {:?} failed", root)))),
        })
        .into_dyn_iter()
}

fn process_dir_entry(de: DirEntry) -> Option<Result<PathBuf>> {
    if de.file_type().is_dir() {
        tracing::trace!("Descending into {:?}", de.path());
        return None;
    }
    if de.file_type().is_symlink() && !de.path().is_file() {
        tracing::trace!("Skipping dangling or directory symlink {:?}", de.path());
        return None;
    }
    tracing::trace!("Including file: {:?}", de.path());
    Some(Ok(de.into_path()))
}
