use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

/// Exclusion pattern matched against absolute file paths.
///
/// `*` stops at path separators; `**` spans directories.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExcludePattern(Glob);

impl ExcludePattern {
    pub fn parse<S: AsRef<str>>(pattern: S) -> Result<Self> {
        let glob = GlobBuilder::new(pattern.as_ref())
            .literal_separator(true)
            .build()?;
        Ok(Self(glob))
    }

    pub fn as_str(&self) -> &str {
        self.0.glob()
    }
}

impl TryFrom<String> for ExcludePattern {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<ExcludePattern> for String {
    fn from(value: ExcludePattern) -> Self {
        value.as_str().to_owned()
    }
}

pub fn build_globset<'a, I>(patterns: I) -> Result<GlobSet>
where
    I: IntoIterator<Item = &'a ExcludePattern>,
{
    patterns
        .into_iter()
        .fold(GlobSetBuilder::new(), |mut builder, pattern| {
            builder.add(pattern.0.clone());
            builder
        })
        .build()
        .map_err(Error::from)
}
