//! Save configuration via `nestdoc.toml`
//!
//! A default `nestdoc.toml` can be written next to the application's data.
//! Every field is optional; missing fields take their defaults.

use nestdoc_core::{Error, Result, DEFAULT_PARTITION_KEY_VALUE};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name
pub const CONFIG_FILE_NAME: &str = "nestdoc.toml";

/// Save pipeline configuration
///
/// # Example
///
/// ```toml
/// # Include key values in orphaned-document errors and save logs
/// sensitive_data_logging = false
///
/// # Value stamped into the __partitionKey field of new documents
/// partition_key_value = "0"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveConfig {
    /// Surface entity key values in errors and logs
    #[serde(default)]
    pub sensitive_data_logging: bool,
    /// Partition key value stamped on created and rebuilt documents
    #[serde(default = "default_partition_key_value")]
    pub partition_key_value: String,
}

fn default_partition_key_value() -> String {
    DEFAULT_PARTITION_KEY_VALUE.to_string()
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            sensitive_data_logging: false,
            partition_key_value: default_partition_key_value(),
        }
    }
}

impl SaveConfig {
    /// Enable or disable sensitive data logging
    pub fn with_sensitive_data_logging(mut self, enabled: bool) -> Self {
        self.sensitive_data_logging = enabled;
        self
    }

    /// Set the partition key value
    pub fn with_partition_key_value(mut self, value: impl Into<String>) -> Self {
        self.partition_key_value = value.into();
        self
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the partition key value is empty.
    pub fn validate(&self) -> Result<()> {
        if self.partition_key_value.is_empty() {
            return Err(Error::Config(
                "partition_key_value must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SaveConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{} ({})", msg, path.display())),
            other => other,
        })
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# nestdoc save configuration
#
# Include entity key values in orphaned-document errors and save logs.
# Key values may contain personal data; keep this off in production.
sensitive_data_logging = false

# Value stamped into the __partitionKey field of every document the
# pipeline creates or rebuilds.
partition_key_value = "0"
"#
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
