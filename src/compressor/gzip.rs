//! The `gzip` compressor.
//!
//! Applies gzip compression to chunk bytes.

use std::io::{Cursor, Read};
use std::sync::Arc;

use derive_more::Display;
use flate2::bufread::{GzDecoder, GzEncoder};
use serde::{Deserialize, Serialize};

use crate::plugin::PluginCreateError;

use super::{
    Compressor, CompressorConfiguration, CompressorError, CompressorPlugin, CompressorTraits,
};

/// The identifier for the `gzip` compressor.
pub const IDENTIFIER: &str = "gzip";

/// The highest supported gzip compression level.
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

/// The compression level applied when the configuration leaves it out.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 1;

// Register the compressor.
inventory::submit! {
    CompressorPlugin::new(IDENTIFIER, is_name_gzip, create_compressor_gzip)
}

fn is_name_gzip(name: &str) -> bool {
    name.eq(IDENTIFIER)
}

fn create_compressor_gzip(
    configuration: &CompressorConfiguration,
) -> Result<Compressor, PluginCreateError> {
    let configuration: GzipCompressorConfiguration = configuration.to_parameters()?;
    Ok(Arc::new(GzipCompressor::new_with_configuration(
        &configuration,
    )))
}

/// Configuration parameters for the `gzip` compressor.
///
/// The `level` is an integer from 0 to 9 which controls the speed and level
/// of compression. A level of 1 is the fastest compression method and
/// produces the least compression, while 9 is slowest and produces the most
/// compression. Compression is turned off completely when level is 0.
/// An absent level defaults to [`DEFAULT_COMPRESSION_LEVEL`].
#[derive(Serialize, Deserialize, Clone, Eq, PartialEq, Debug, Display)]
#[serde(deny_unknown_fields)]
#[display("{}", serde_json::to_string(self).unwrap_or_default())]
pub struct GzipCompressorConfiguration {
    /// The compression level.
    #[serde(
        default = "default_compression_level",
        deserialize_with = "deserialize_compression_level"
    )]
    pub level: u32,
}

fn default_compression_level() -> u32 {
    DEFAULT_COMPRESSION_LEVEL
}

fn deserialize_compression_level<'de, D: serde::Deserializer<'de>>(
    d: D,
) -> Result<u32, D::Error> {
    let level = u32::deserialize(d).map_err(|_| {
        serde::de::Error::custom(format!(
            "gzip compression level must be an integer between 0 and {MAX_COMPRESSION_LEVEL}"
        ))
    })?;
    if level > MAX_COMPRESSION_LEVEL {
        return Err(serde::de::Error::custom(format!(
            "invalid gzip compression level {level}, must be 0-{MAX_COMPRESSION_LEVEL}"
        )));
    }
    Ok(level)
}

impl GzipCompressorConfiguration {
    /// Create a new `gzip` compressor configuration.
    ///
    /// # Errors
    /// Returns [`GzipCompressionLevelError`] if `level` exceeds
    /// [`MAX_COMPRESSION_LEVEL`].
    pub fn new(level: u32) -> Result<Self, GzipCompressionLevelError> {
        if level <= MAX_COMPRESSION_LEVEL {
            Ok(Self { level })
        } else {
            Err(GzipCompressionLevelError { level })
        }
    }
}

/// An invalid gzip compression level.
#[derive(Debug, thiserror::Error)]
#[error("invalid gzip compression level {level}, must be 0-{MAX_COMPRESSION_LEVEL}")]
pub struct GzipCompressionLevelError {
    level: u32,
}

/// A `gzip` compressor implementation.
#[derive(Clone, Debug)]
pub struct GzipCompressor {
    compression_level: u32,
}

impl GzipCompressor {
    /// Create a new `gzip` compressor.
    ///
    /// # Errors
    /// Returns [`GzipCompressionLevelError`] if `compression_level` exceeds
    /// [`MAX_COMPRESSION_LEVEL`].
    pub fn new(compression_level: u32) -> Result<Self, GzipCompressionLevelError> {
        let configuration = GzipCompressorConfiguration::new(compression_level)?;
        Ok(Self::new_with_configuration(&configuration))
    }

    /// Create a new `gzip` compressor from configuration.
    #[must_use]
    pub const fn new_with_configuration(configuration: &GzipCompressorConfiguration) -> Self {
        Self {
            compression_level: configuration.level,
        }
    }
}

impl CompressorTraits for GzipCompressor {
    fn identifier(&self) -> &'static str {
        IDENTIFIER
    }

    fn configuration(&self) -> CompressorConfiguration {
        let configuration = GzipCompressorConfiguration {
            level: self.compression_level,
        };
        CompressorConfiguration::new_with_serializable_parameters(IDENTIFIER, &configuration)
            .expect("gzip configuration is serializable to a JSON object")
    }

    fn encode(&self, decoded: Vec<u8>) -> Result<Vec<u8>, CompressorError> {
        let mut encoder = GzEncoder::new(
            Cursor::new(decoded),
            flate2::Compression::new(self.compression_level),
        );
        let mut out: Vec<u8> = Vec::new();
        encoder.read_to_end(&mut out)?;
        Ok(out)
    }

    fn decode(&self, encoded: Vec<u8>) -> Result<Vec<u8>, CompressorError> {
        let mut decoder = GzDecoder::new(Cursor::new(encoded));
        let mut out: Vec<u8> = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }
}
