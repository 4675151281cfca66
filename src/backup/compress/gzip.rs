use crate::backup::compress::{Compressor, CompressorBuilder};
use crate::backup::result_error::result::Result;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::io::Write;
use validator::Validate;

static DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Gzip (deflate) compression, the default codec for database dumps.
#[skip_serializing_none]
#[derive(Clone, Default, Validate, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GzipConfig {
    /// Compression level (0-9), 6 when unset.
    #[validate(range(min = 0, max = 9))]
    level: Option<u32>,
}

impl<W: Write> CompressorBuilder<W> for GzipConfig {
    fn build_compressor(&self, writer: W) -> Result<Compressor<W>> {
        let level = self.level.unwrap_or(DEFAULT_COMPRESSION_LEVEL);
        tracing::debug!("Creating gzip compressor with level={}", level);
        Ok(GzEncoder::new(writer, Compression::new(level)).into())
    }
}
