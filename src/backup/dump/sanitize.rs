use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Table-driven scrubbing rules: `table -> column -> replacement`.
///
/// A `null` replacement blanks the column, anything else replaces every
/// value of that column with the given text.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct SanitizeRules {
    tables: BTreeMap<String, BTreeMap<String, Option<String>>>,
}

impl SanitizeRules {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn rule<T: Into<String>, C: Into<String>>(
        mut self,
        table: T,
        column: C,
        replacement: Option<&str>,
    ) -> Self {
        self.tables
            .entry(table.into())
            .or_default()
            .insert(column.into(), replacement.map(str::to_owned));
        self
    }

    /// Replacement for `table.column`, `None` when the column is kept as is.
    pub fn replacement(&self, table: &str, column: &str) -> Option<Option<&str>> {
        self.tables
            .get(table)
            .and_then(|columns| columns.get(column))
            .map(Option::as_deref)
    }

    /// Per-column replacements for one table, in column order.
    pub fn for_columns(&self, table: &str, columns: &[String]) -> Vec<Option<Option<String>>> {
        columns
            .iter()
            .map(|c| self.replacement(table, c).map(|r| r.map(str::to_owned)))
            .collect()
    }
}
