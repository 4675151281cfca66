pub mod policy;
pub mod sanitize;
pub mod sqlite;
pub mod window;

use crate::backup::compress::CompressorConfig;
use crate::backup::dump::window::DateFilterWindow;
use crate::backup::result_error::result::Result;
use bon::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;

/// Produces a database extract for one logical connection.
///
/// Implementations own their connections; the job only asks for metadata,
/// a dump file, and (opt-in) removal of rows that were just archived.
///
/// A dump must come from a single consistent snapshot of the database.
pub trait Dumper: Debug + Send + Sync {
    fn db_name(&self) -> &str;

    /// Base tables that exist on the connection.
    fn table_names(&self) -> Result<Vec<String>>;

    /// View objects, as reported by the engine metadata.
    fn view_names(&self) -> Result<Vec<String>>;

    /// Writes the extract described by `request` to `path`.
    ///
    /// Must only return `Ok` once the file is fully written and flushed.
    /// For windowed requests the receipt holds, per dumped table, the last
    /// row id visible to the snapshot the dump was read from.
    fn dump_to_file(&self, path: &Path, request: &DumpRequest) -> Result<DumpReceipt>;

    /// Deletes rows of `table` whose `created_at` date lies inside `window`
    /// and whose row id is at most `last_rowid`.
    fn delete_rows_in_window(
        &self,
        table: &str,
        window: &DateFilterWindow,
        last_rowid: i64,
    ) -> Result<usize>;
}

/// Snapshot bounds of a finished dump.
///
/// Rows written after the snapshot have a larger row id and are never purged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DumpReceipt {
    last_rowids: BTreeMap<String, i64>,
}

impl DumpReceipt {
    pub fn record<S: Into<String>>(&mut self, table: S, last_rowid: i64) {
        self.last_rowids.insert(table.into(), last_rowid);
    }

    /// `None` when the table was empty or has no row ids, so nothing may be purged.
    pub fn last_rowid(&self, table: &str) -> Option<i64> {
        self.last_rowids.get(table).copied()
    }
}

/// What a single dump should contain and how it is written.
///
/// An empty `include_tables` means every table not listed in `exclude_tables`.
#[derive(Clone, Debug, Default, Builder, Getters, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct DumpRequest {
    #[builder(default, into)]
    include_tables: Vec<String>,
    #[builder(default, into)]
    exclude_tables: Vec<String>,
    window: Option<DateFilterWindow>,
    #[builder(default)]
    skip_create_table: bool,
    #[builder(default)]
    sanitized: bool,
    #[builder(default)]
    compressor: CompressorConfig,
}

impl DumpRequest {
    pub fn selects_table(&self, table: &str) -> bool {
        (self.include_tables.is_empty() || self.include_tables.iter().any(|t| t == table))
            && !self.exclude_tables.iter().any(|t| t == table)
    }
}

/// Per-connection dump behaviour, read from the `databases` section.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Builder, Getters, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct DumpSettings {
    /// Views are never dumped from the primary connection.
    #[serde(default)]
    #[builder(default)]
    primary: bool,
    /// The connection holds append-only log tables eligible for date filtering.
    #[serde(default)]
    #[builder(default)]
    log_oriented: bool,
    #[serde(default)]
    #[builder(default, into)]
    log_tables: Vec<String>,
    #[serde(default)]
    #[builder(default, into)]
    include_tables: Vec<String>,
    #[serde(default)]
    #[builder(default, into)]
    exclude_tables: Vec<String>,
    /// Delete the archived rows from the live log tables after a filtered dump.
    #[serde(default)]
    #[builder(default)]
    purge_after_filtered_dump: bool,
}

impl DumpSettings {
    pub fn is_log_table(&self, table: &str) -> bool {
        self.log_tables.iter().any(|t| t == table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selects_table() {
        let all = DumpRequest::default();
        assert!(all.selects_table("users"));

        let request = DumpRequest::builder()
            .include_tables(vec!["users".to_owned(), "orders".to_owned()])
            .exclude_tables(vec!["orders".to_owned()])
            .build();
        assert!(request.selects_table("users"));
        assert!(!request.selects_table("orders"));
        assert!(!request.selects_table("sessions"));
    }

    #[test]
    fn test_settings_from_yaml() {
        let yaml = "log_oriented: true\nlog_tables: [request_logs, audit_logs]\n";
        let settings: DumpSettings = serde_yml::from_str(yaml).unwrap();
        assert!(*settings.log_oriented());
        assert!(!*settings.primary());
        assert!(!*settings.purge_after_filtered_dump());
        assert!(settings.is_log_table("audit_logs"));
        assert!(!settings.is_log_table("users"));
    }
}
