//! Configuration via `xwrap.toml`
//!
//! A config names the adapter to construct, the id-space to register it
//! under, whether to install the wrap hook, and the settings handed to the
//! adapter constructor:
//!
//! ```toml
//! adapter = "memory"
//! id = "main"
//! wrap = true
//!
//! [settings]
//! subtransactions = true
//! ```

use serde::Deserialize;
use std::path::Path;
use xwrap_core::{Error, Result, Settings};

/// Default config file name
pub const CONFIG_FILE_NAME: &str = "xwrap.toml";

/// Id-space used when a config does not name one
pub const DEFAULT_ID: &str = "default";

/// Factory configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct XWrapConfig {
    /// Registry name of the adapter
    pub adapter: String,
    /// Id-space to register the facade under
    #[serde(default = "default_id")]
    pub id: String,
    /// Install the ambient-client accessor into adapters that support it
    #[serde(default = "default_wrap")]
    pub wrap: bool,
    /// Passed verbatim to the adapter constructor
    #[serde(default)]
    pub settings: Settings,
}

fn default_id() -> String {
    DEFAULT_ID.to_string()
}

fn default_wrap() -> bool {
    true
}

impl XWrapConfig {
    /// Config for adapter `adapter` in id-space `id`, wrap on, no settings
    pub fn new(adapter: impl Into<String>, id: impl Into<String>) -> Self {
        XWrapConfig {
            adapter: adapter.into(),
            id: id.into(),
            wrap: default_wrap(),
            settings: Settings::Null,
        }
    }

    /// Replace the adapter settings
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Turn the wrap hook on or off
    pub fn with_wrap(mut self, wrap: bool) -> Self {
        self.wrap = wrap;
        self
    }

    /// Check the config can be used to initialize a factory.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter or id is empty, or settings are
    /// neither absent nor a table.
    pub fn validate(&self) -> Result<()> {
        if self.adapter.trim().is_empty() {
            return Err(Error::Config("adapter must not be empty".to_string()));
        }
        if self.id.trim().is_empty() {
            return Err(Error::Config("id must not be empty".to_string()));
        }
        if !(self.settings.is_null() || self.settings.is_object()) {
            return Err(Error::Config(format!(
                "settings must be a table, got {}",
                self.settings
            )));
        }
        Ok(())
    }

    /// Parse config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text cannot be parsed or fails validation.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: XWrapConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: XWrapConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }
}
