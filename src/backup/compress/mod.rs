pub mod gzip;
pub mod xz;

use crate::backup::file_ext::FileExtProvider;
use crate::backup::finish::Finish;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddDebugObjectAndFnName;
use derive_more::From;
use flate2::write::GzEncoder;
use io_enum::Write;
use liblzma::write::XzEncoder;
use serde::{Deserialize, Serialize};
use std::io;
use std::io::Write;
use std::result;
use validator::{Validate, ValidationErrors};

/// Writer produced by a [`CompressorConfig`]; `Plain` writes through untouched.
#[derive(Write, From)]
pub enum Compressor<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
    Xz(XzEncoder<W>),
}

/// Compression codec registry, resolved from the `compressor_type` tag.
///
/// Used for both the dump files and the final archive stream. Only one
/// codec is ever active for a given output.
#[derive(Clone, Default, From, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "compressor_type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum CompressorConfig {
    #[default]
    None,
    Gzip(gzip::GzipConfig),
    Xz(xz::XzConfig),
}

impl CompressorConfig {
    pub fn gzip() -> Self {
        Self::Gzip(gzip::GzipConfig::default())
    }
}

impl Validate for CompressorConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            Self::Gzip(gzip) => gzip.validate(),
            Self::Xz(xz) => xz.validate(),
            Self::None => Ok(()),
        }
    }
}

pub trait CompressorBuilder<W: Write> {
    fn build_compressor(&self, writer: W) -> Result<Compressor<W>>;
}

impl<W: Write> Finish<W> for Compressor<W> {
    fn finish(self) -> io::Result<W> {
        match self {
            Compressor::Plain(inner) => Ok(inner),
            Compressor::Gzip(encoder) => encoder.finish(),
            Compressor::Xz(encoder) => encoder.finish(),
        }
    }
}

impl<W: Write> CompressorBuilder<W> for CompressorConfig {
    fn build_compressor(&self, writer: W) -> Result<Compressor<W>> {
        let built = match self {
            CompressorConfig::None => return Ok(Compressor::Plain(writer)),
            CompressorConfig::Gzip(gzip) => gzip.build_compressor(writer),
            CompressorConfig::Xz(xz) => xz.build_compressor(writer),
        };
        built.add_debug_object_and_fn_name(self.clone(), "build_compressor")
    }
}

impl FileExtProvider for CompressorConfig {
    fn file_ext(&self) -> Option<&'static str> {
        match self {
            Self::Gzip(_) => Some("gz"),
            Self::Xz(_) => Some("xz"),
            Self::None => None,
        }
    }
}
