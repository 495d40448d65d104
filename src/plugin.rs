//! Plugin machinery backing the process-global registries.
//!
//! A [`Plugin`] creates a concrete implementation of an extension point from
//! inputs. `gridfile` has two extension points: [compressors](crate::compressor)
//! and [drivers](crate::driver).
//!
//! Plugins are registered at compile time using the
//! [`inventory`](https://docs.rs/inventory/latest/inventory/) crate.
//! At runtime, a name matching function is applied to identify which registered
//! plugin is associated with an identifier. If a match is found, the plugin is
//! created from the inputs. Registries are never mutated after startup;
//! lookups only iterate the registered set.

use thiserror::Error;

/// A plugin.
pub struct Plugin<TPlugin, TInputs> {
    /// the identifier of the plugin.
    identifier: &'static str,
    /// Tests if the name is a match for this plugin.
    match_name_fn: fn(name: &str) -> bool,
    /// Create an implementation of this plugin from inputs.
    create_fn: fn(inputs: &TInputs) -> Result<TPlugin, PluginCreateError>,
}

/// A plugin creation error.
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum PluginCreateError {
    /// An unsupported plugin.
    #[error("{plugin_type} {name} is not supported")]
    Unsupported {
        name: String,
        plugin_type: &'static str,
    },
    /// Invalid configuration.
    #[error(transparent)]
    ConfigurationInvalid(#[from] ConfigurationInvalidError),
    /// Other
    #[error("{_0}")]
    Other(String),
}

impl From<&str> for PluginCreateError {
    fn from(err_string: &str) -> Self {
        Self::Other(err_string.to_string())
    }
}

impl From<String> for PluginCreateError {
    fn from(err_string: String) -> Self {
        Self::Other(err_string)
    }
}

/// An invalid configuration error.
#[derive(Debug, Error)]
#[error("{name} is unsupported, configuration: {configuration}")]
pub struct ConfigurationInvalidError {
    name: String,
    configuration: String,
}

impl ConfigurationInvalidError {
    /// Create a new invalid configuration error.
    #[must_use]
    pub fn new(name: String, configuration: String) -> Self {
        Self {
            name,
            configuration,
        }
    }

    /// Return the name of the invalid configuration.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<TPlugin, TInputs> Plugin<TPlugin, TInputs> {
    /// Create a new plugin for registration.
    pub const fn new(
        identifier: &'static str,
        match_name_fn: fn(name: &str) -> bool,
        create_fn: fn(inputs: &TInputs) -> Result<TPlugin, PluginCreateError>,
    ) -> Self {
        Self {
            identifier,
            match_name_fn,
            create_fn,
        }
    }

    /// Create a `TPlugin` plugin from `inputs`.
    ///
    /// # Errors
    /// Returns a [`PluginCreateError`] if plugin creation fails due to either:
    ///  - the name being unregistered, or
    ///  - the configuration being invalid, or
    ///  - some other reason specific to the plugin.
    pub fn create(&self, inputs: &TInputs) -> Result<TPlugin, PluginCreateError> {
        (self.create_fn)(inputs)
    }

    /// Returns true if this plugin is associated with `name`.
    #[must_use]
    pub fn match_name(&self, name: &str) -> bool {
        (self.match_name_fn)(name)
    }

    /// Returns the identifier of the plugin.
    #[must_use]
    pub const fn identifier(&self) -> &'static str {
        self.identifier
    }
}
