use crate::backup::compress::CompressorBuilder;
use crate::backup::dump::sanitize::SanitizeRules;
use crate::backup::dump::window::DateFilterWindow;
use crate::backup::dump::{DumpReceipt, DumpRequest, Dumper};
use crate::backup::finish::Finish;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::validate::validate_sql_file;
use bon::Builder;
use function_name::named;
use getset::Getters;
use itertools::Itertools;
use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, IntoInnerError, Write};
use std::path::{Path, PathBuf};
use validator::Validate;

static CREATED_AT_FILTER: &str = "WHERE date(created_at) BETWEEN ?1 AND ?2";

/// Dumps a SQLite database file as plain SQL text.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[getset(get = "pub")]
pub struct SqliteDumper {
    #[builder(into)]
    name: String,
    #[validate(custom(function = validate_sql_file))]
    #[builder(into)]
    path: PathBuf,
    #[serde(default)]
    #[builder(default)]
    sanitize: SanitizeRules,
}

struct SchemaObject {
    name: String,
    sql: String,
}

impl SqliteDumper {
    fn open(&self, flags: OpenFlags) -> Result<Connection> {
        Ok(Connection::open_with_flags(
            &self.path,
            flags | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?)
    }

    fn schema_objects(conn: &Connection, kind: &str) -> Result<Vec<SchemaObject>> {
        let mut stmt = conn.prepare(
            "SELECT name, sql FROM sqlite_master \
             WHERE type = ?1 AND name NOT LIKE 'sqlite_%' AND sql IS NOT NULL \
             ORDER BY name",
        )?;
        let objects = stmt
            .query_map([kind], |row| {
                Ok(SchemaObject {
                    name: row.get(0)?,
                    sql: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(objects)
    }

    /// Writes the whole dump from one read transaction, so every table comes
    /// from the same snapshot and the recorded row ids match what was written.
    fn write_dump<W: Write>(
        &self,
        conn: &Connection,
        writer: &mut W,
        request: &DumpRequest,
    ) -> Result<DumpReceipt> {
        let snapshot = conn.unchecked_transaction()?;
        let skip_create_table = *request.skip_create_table();
        let mut receipt = DumpReceipt::default();

        writeln!(writer, "-- dump of connection {}", self.name)?;
        if let Some(window) = request.window() {
            writeln!(writer, "-- rows created from {} to {}", window.start(), window.end())?;
        }
        writeln!(writer, "PRAGMA foreign_keys=OFF;")?;
        writeln!(writer, "BEGIN TRANSACTION;")?;

        for table in Self::schema_objects(&snapshot, "table")?
            .into_iter()
            .filter(|t| request.selects_table(&t.name))
        {
            if !skip_create_table {
                writeln!(writer, "{};", table.sql)?;
            }
            if request.window().is_some() {
                if let Some(last_rowid) = self.last_rowid(&snapshot, &table.name) {
                    receipt.record(&table.name, last_rowid);
                }
            }
            self.write_rows(&snapshot, writer, &table.name, request)
                .add_msg(format!("Dumping table {:?} failed", table.name))?;
        }

        if !skip_create_table {
            for view in Self::schema_objects(&snapshot, "view")?
                .into_iter()
                .filter(|v| request.selects_table(&v.name))
            {
                writeln!(writer, "{};", view.sql)?;
            }
        }

        writeln!(writer, "COMMIT;")?;
        snapshot.commit()?;
        Ok(receipt)
    }

    fn last_rowid(&self, conn: &Connection, table: &str) -> Option<i64> {
        let sql = format!("SELECT max(rowid) FROM {}", quote_ident(table));
        match conn.query_row(&sql, [], |row| row.get::<_, Option<i64>>(0)) {
            Ok(last_rowid) => last_rowid,
            Err(e) => {
                tracing::warn!(
                    "No row id bound for {}.{}, its rows will not be purged: {}",
                    self.name,
                    table,
                    e
                );
                None
            }
        }
    }

    fn write_rows<W: Write>(
        &self,
        conn: &Connection,
        writer: &mut W,
        table: &str,
        request: &DumpRequest,
    ) -> Result<()> {
        let mut sql = format!("SELECT * FROM {}", quote_ident(table));
        let window_params = match request.window() {
            Some(window) => {
                sql.push(' ');
                sql.push_str(CREATED_AT_FILTER);
                vec![window.start().to_string(), window.end().to_string()]
            }
            None => Vec::new(),
        };

        let mut stmt = conn.prepare(&sql)?;
        let columns = stmt.column_names().into_iter().map(str::to_owned).collect_vec();
        let replacements = if *request.sanitized() {
            self.sanitize.for_columns(table, &columns)
        } else {
            vec![None; columns.len()]
        };

        let mut rows = stmt.query(params_from_iter(window_params.iter()))?;
        let mut count = 0usize;
        while let Some(row) = rows.next()? {
            let values = replacements
                .iter()
                .enumerate()
                .map(|(i, replacement)| match replacement {
                    Some(Some(text)) => Ok(quote_text(text)),
                    Some(None) => Ok("NULL".to_owned()),
                    None => row.get_ref(i).map(sql_literal),
                })
                .collect::<rusqlite::Result<Vec<_>>>()?;
            writeln!(
                writer,
                "INSERT INTO {} VALUES({});",
                quote_ident(table),
                values.join(",")
            )?;
            count += 1;
        }
        tracing::debug!("Dumped {} rows of {}.{}", count, self.name, table);
        Ok(())
    }
}

impl Dumper for SqliteDumper {
    fn db_name(&self) -> &str {
        &self.name
    }

    fn table_names(&self) -> Result<Vec<String>> {
        let conn = self.open(OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self::schema_objects(&conn, "table")?
            .into_iter()
            .map(|o| o.name)
            .collect())
    }

    fn view_names(&self) -> Result<Vec<String>> {
        let conn = self.open(OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self::schema_objects(&conn, "view")?
            .into_iter()
            .map(|o| o.name)
            .collect())
    }

    #[named]
    fn dump_to_file(&self, path: &Path, request: &DumpRequest) -> Result<DumpReceipt> {
        tracing::info!("Dumping sqlite database {:?} to {:?}", self.path, path);
        let conn = self.open(OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let mut writer = File::create(path)
            .map(BufWriter::new)
            .map_err(Error::from)
            .and_then(|f| request.compressor().build_compressor(f))
            .add_fn_name(function_path!())?;

        let receipt = self
            .write_dump(&conn, &mut writer, request)
            .add_fn_name(function_path!())?;

        let file = writer
            .finish()?
            .into_inner()
            .map_err(IntoInnerError::into_error)?;
        file.sync_all()?;
        Ok(receipt)
    }

    fn delete_rows_in_window(
        &self,
        table: &str,
        window: &DateFilterWindow,
        last_rowid: i64,
    ) -> Result<usize> {
        let conn = self.open(OpenFlags::SQLITE_OPEN_READ_WRITE)?;
        let sql = format!(
            "DELETE FROM {} {} AND rowid <= ?3",
            quote_ident(table),
            CREATED_AT_FILTER
        );
        let deleted = conn.execute(
            &sql,
            params![window.start().to_string(), window.end().to_string(), last_rowid],
        )?;
        Ok(deleted)
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_text(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn sql_literal(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_owned(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) if f.is_finite() => format!("{f:?}"),
        ValueRef::Real(_) => "NULL".to_owned(),
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => quote_text(text),
            // not UTF-8, emit the stored bytes unchanged
            Err(_) => format!("CAST({} AS TEXT)", hex_literal(bytes)),
        },
        ValueRef::Blob(bytes) => hex_literal(bytes),
    }
}

fn hex_literal(bytes: &[u8]) -> String {
    format!("X'{}'", bytes.iter().map(|b| format!("{b:02x}")).join(""))
}
