use crate::backup::compress::CompressorConfig;
use crate::backup::dump::window::DateFilterWindow;
use crate::backup::dump::{DumpRequest, DumpSettings, Dumper};
use crate::backup::file_ext::FileExtProvider;
use crate::backup::function_path;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddFunctionName;
use bon::Builder;
use function_name::named;
use getset::Getters;

/// Marker segment added to dump and archive names of scrubbed backups.
pub static SANITIZED_MARKER: &str = "sanitized";
static DUMP_FILE_EXT: &str = "sql";

/// A resolved dump for one connection: where it goes and what it contains.
#[derive(Clone, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct DumpPlan {
    connection: String,
    file_name: String,
    request: DumpRequest,
    /// Tables whose archived rows are deleted once the dump is on disk.
    purge_tables: Vec<String>,
}

/// Turns per-connection settings plus the run-wide filter into dump plans.
#[derive(Clone, Debug, Builder, Getters)]
#[getset(get = "pub")]
pub struct DumpFilterPolicy {
    window: Option<DateFilterWindow>,
    #[builder(default)]
    sanitized: bool,
    #[builder(default = CompressorConfig::gzip())]
    compressor: CompressorConfig,
}

impl Default for DumpFilterPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl DumpFilterPolicy {
    /// The date window only ever applies to log-oriented connections.
    pub fn window_for(&self, settings: &DumpSettings) -> Option<DateFilterWindow> {
        self.window.filter(|_| *settings.log_oriented())
    }

    pub fn dump_file_name(&self, connection: &str, settings: &DumpSettings) -> String {
        let mut name = match self.window_for(settings) {
            Some(window) => window.anchor_name(),
            None => connection.to_owned(),
        };
        if self.sanitized {
            name = format!("{name}-{SANITIZED_MARKER}");
        }
        name.push('.');
        name.push_str(DUMP_FILE_EXT);
        if let Some(ext) = self.compressor.file_ext() {
            name.push('.');
            name.push_str(ext);
        }
        name
    }

    /// Resolves the dump for `connection`.
    ///
    /// Returns `None` when a filtered log dump would select no table at all,
    /// since an empty include list would otherwise mean "every table".
    #[named]
    pub fn plan(
        &self,
        connection: &str,
        settings: &DumpSettings,
        dumper: &dyn Dumper,
    ) -> Result<Option<DumpPlan>> {
        let mut include_tables = settings.include_tables().clone();
        let mut exclude_tables = settings.exclude_tables().clone();

        if *settings.primary() {
            let views = dumper.view_names().add_fn_name(function_path!())?;
            tracing::debug!("Excluding {} views from primary connection {}", views.len(), connection);
            exclude_tables.extend(views);
        }

        let window = self.window_for(settings);
        if let Some(window) = &window {
            let existing = dumper.table_names().add_fn_name(function_path!())?;
            include_tables = settings
                .log_tables()
                .iter()
                .filter(|t| existing.contains(*t))
                .cloned()
                .collect();
            if include_tables.is_empty() {
                tracing::warn!(
                    "No log table of connection {} exists, skipping {} filtered dump",
                    connection,
                    window.mode()
                );
                return Ok(None);
            }
            tracing::info!(
                "Dumping {:?} of {} between {} and {}",
                include_tables,
                connection,
                window.start(),
                window.end()
            );
        }

        let purge_tables = match window {
            Some(_) if *settings.purge_after_filtered_dump() => include_tables.clone(),
            _ => Vec::new(),
        };

        let request = DumpRequest::builder()
            .include_tables(include_tables)
            .exclude_tables(exclude_tables)
            .maybe_window(window)
            .skip_create_table(window.is_some())
            .sanitized(self.sanitized)
            .compressor(self.compressor.clone())
            .build();

        Ok(Some(DumpPlan {
            connection: connection.to_owned(),
            file_name: self.dump_file_name(connection, settings),
            request,
            purge_tables,
        }))
    }
}
