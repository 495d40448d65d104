//! Compressors applied to chunks before they are stored in the container.
//!
//! A compressor is identified by a string id drawn from the process-global
//! compressor registry. Its parameters are bound to and from JSON as a flat
//! object alongside the id:
//! ```json
//! { "id": "gzip", "level": 5 }
//! ```
//!
//! Compressors are registered at compile time with the [`Plugin`] machinery;
//! the registry is never mutated after startup. Built-in: [`gzip`].

pub mod gzip;

use std::sync::Arc;

use serde::{
    de::DeserializeOwned,
    ser::{Error as _, SerializeMap},
    Deserialize, Serialize,
};
use thiserror::Error;

use crate::plugin::{ConfigurationInvalidError, Plugin, PluginCreateError};

/// A compressor configuration: a registry id and its JSON-bound parameters.
///
/// Serializes as `{"id": <id>, ...parameters}` with the parameters in
/// key-sorted order.
#[derive(Clone, Debug, PartialEq)]
pub struct CompressorConfiguration {
    id: String,
    parameters: serde_json::Map<String, serde_json::Value>,
}

impl CompressorConfiguration {
    /// Create a compressor configuration from `id` and `parameters`.
    #[must_use]
    pub fn new(id: &str, parameters: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            id: id.into(),
            parameters,
        }
    }

    /// Convert serializable parameters to a [`CompressorConfiguration`].
    ///
    /// # Errors
    /// Returns [`serde_json::Error`] if `parameters` cannot be serialized to a
    /// JSON object.
    pub fn new_with_serializable_parameters<TParameters: Serialize>(
        id: &str,
        parameters: &TParameters,
    ) -> Result<Self, serde_json::Error> {
        let parameters = serde_json::to_value(parameters)?;
        if let serde_json::Value::Object(parameters) = parameters {
            Ok(Self::new(id, parameters))
        } else {
            Err(serde_json::Error::custom(
                "the parameters cannot be serialized to a JSON object",
            ))
        }
    }

    /// Try and convert the parameters to a concrete configuration type.
    ///
    /// # Errors
    /// Returns a [`ConfigurationInvalidError`] if the parameters cannot be
    /// converted.
    pub fn to_parameters<TParameters: DeserializeOwned>(
        &self,
    ) -> Result<TParameters, ConfigurationInvalidError> {
        serde_json::from_value(serde_json::Value::Object(self.parameters.clone())).map_err(|_| {
            ConfigurationInvalidError::new(
                self.id.clone(),
                serde_json::Value::Object(self.parameters.clone()).to_string(),
            )
        })
    }

    /// Returns the compressor id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the compressor parameters.
    #[must_use]
    pub const fn parameters(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.parameters
    }
}

impl std::fmt::Display for CompressorConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            serde_json::to_string(self).unwrap_or_default()
        )
    }
}

impl Serialize for CompressorConfiguration {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut s = s.serialize_map(Some(1 + self.parameters.len()))?;
        s.serialize_entry("id", &self.id)?;
        for (key, value) in &self.parameters {
            s.serialize_entry(key, value)?;
        }
        s.end()
    }
}

impl<'de> Deserialize<'de> for CompressorConfiguration {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let mut map = serde_json::Map::deserialize(d)?;
        // "type" is accepted as an alias of "id" for compatibility with
        // dataset specs.
        let id = match map.remove("id").or_else(|| map.remove("type")) {
            Some(serde_json::Value::String(id)) => id,
            _ => {
                return Err(serde::de::Error::custom(
                    r#"expected a compressor {"id":"<id>", ...}"#,
                ))
            }
        };
        Ok(Self {
            id,
            parameters: map,
        })
    }
}

/// A compressor error.
#[derive(Debug, Error)]
pub enum CompressorError {
    /// An IO error from the underlying codec.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Any other error.
    #[error("{_0}")]
    Other(String),
}

/// Compressor traits: encode and decode over byte buffers, plus the JSON
/// configuration form.
pub trait CompressorTraits: Send + Sync + core::fmt::Debug {
    /// The registry id of the compressor.
    fn identifier(&self) -> &'static str;

    /// The configuration of this compressor instance.
    fn configuration(&self) -> CompressorConfiguration;

    /// Encode `decoded` bytes.
    ///
    /// # Errors
    /// Returns a [`CompressorError`] if encoding fails.
    fn encode(&self, decoded: Vec<u8>) -> Result<Vec<u8>, CompressorError>;

    /// Decode `encoded` bytes.
    ///
    /// # Errors
    /// Returns a [`CompressorError`] if decoding fails.
    fn decode(&self, encoded: Vec<u8>) -> Result<Vec<u8>, CompressorError>;
}

/// A compressor.
pub type Compressor = Arc<dyn CompressorTraits>;

/// A compressor plugin.
pub type CompressorPlugin = Plugin<Compressor, CompressorConfiguration>;
inventory::collect!(CompressorPlugin);

/// Create a compressor from a [`CompressorConfiguration`] via the registry.
///
/// # Errors
/// Returns [`PluginCreateError`] if the id is not registered or the
/// parameters are invalid.
pub fn try_create_compressor(
    configuration: &CompressorConfiguration,
) -> Result<Compressor, PluginCreateError> {
    for plugin in inventory::iter::<CompressorPlugin> {
        if plugin.match_name(configuration.id()) {
            return plugin.create(configuration);
        }
    }
    Err(PluginCreateError::Unsupported {
        name: configuration.id().to_string(),
        plugin_type: "compressor",
    })
}

/// Returns true if `id` is a registered compressor id.
#[must_use]
pub fn compressor_is_registered(id: &str) -> bool {
    inventory::iter::<CompressorPlugin>
        .into_iter()
        .any(|plugin| plugin.match_name(id))
}
