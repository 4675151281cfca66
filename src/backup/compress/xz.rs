use crate::backup::compress::{Compressor, CompressorBuilder};
use crate::backup::result_error::result::Result;
use liblzma::stream::{Check, MtStreamBuilder};
use liblzma::write::XzEncoder;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::io::Write;
use validator::Validate;

const XZ_PRESET: u32 = 3;
const XZ_THREAD_CAP: u32 = 32;

/// LZMA2 in an `.xz` container. Large archives benefit from `threads > 1`.
#[skip_serializing_none]
#[derive(Clone, Default, Validate, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct XzConfig {
    #[validate(range(min = 0, max = 9))]
    level: Option<u32>,
    /// Half the cores when unset.
    #[validate(range(min = 1))]
    threads: Option<u32>,
}

impl XzConfig {
    fn threads(&self) -> u32 {
        if let Some(threads) = self.threads {
            return threads;
        }
        let cores = std::thread::available_parallelism().map_or(1, |n| n.get() as u32);
        (cores / 2).clamp(1, XZ_THREAD_CAP)
    }
}

impl<W: Write> CompressorBuilder<W> for XzConfig {
    fn build_compressor(&self, writer: W) -> Result<Compressor<W>> {
        let preset = self.level.unwrap_or(XZ_PRESET);
        let threads = self.threads();
        tracing::debug!(preset, threads, "xz encoder");

        let encoder = match threads {
            1 => XzEncoder::new(writer, preset),
            n => {
                let stream = MtStreamBuilder::new()
                    .threads(n)
                    .preset(preset)
                    .check(Check::Crc64)
                    .encoder()?;
                XzEncoder::new_stream(writer, stream)
            }
        };
        Ok(encoder.into())
    }
}
