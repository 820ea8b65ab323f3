//! Runtime configuration via `modelbus.toml`
//!
//! One flat file with a `[calls]` section. A missing file means defaults; a
//! default file with comments can be written next to the embedding
//! application on first start.

use modelbus_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file name.
pub const CONFIG_FILE_NAME: &str = "modelbus.toml";

/// Default maximum number of retained change records.
pub const DEFAULT_MAX_CHANGES: usize = 100;

fn default_max_changes() -> usize {
    DEFAULT_MAX_CHANGES
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_output_buffer_ms() -> u64 {
    100
}

/// Call manager settings, the `[calls]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallsConfig {
    /// Interval at which the supervising loop polls an async worker.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Output of an async worker is coalesced into chunks at this period.
    #[serde(default = "default_output_buffer_ms")]
    pub output_buffer_ms: u64,
    /// Timeout applied to async calls that do not pass one (0 = none).
    #[serde(default)]
    pub default_timeout_ms: u64,
}

impl Default for CallsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            output_buffer_ms: default_output_buffer_ms(),
            default_timeout_ms: 0,
        }
    }
}

impl CallsConfig {
    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Output buffer period as a `Duration`.
    pub fn output_buffer(&self) -> Duration {
        Duration::from_millis(self.output_buffer_ms)
    }

    /// Default timeout in seconds, `0.0` when none.
    pub fn default_timeout_secs(&self) -> f64 {
        self.default_timeout_ms as f64 / 1000.0
    }
}

/// Runtime configuration loaded from `modelbus.toml`.
///
/// # Example
///
/// ```toml
/// max_changes = 100
/// # actions_dir = "actions"
///
/// [calls]
/// poll_interval_ms = 100
/// output_buffer_ms = 100
/// default_timeout_ms = 0
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    /// Number of change records kept for changes-since queries.
    #[serde(default = "default_max_changes")]
    pub max_changes: usize,
    /// Script tree scanned by the legacy action importer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions_dir: Option<PathBuf>,
    /// Call manager settings.
    #[serde(default)]
    pub calls: CallsConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_changes: DEFAULT_MAX_CHANGES,
            actions_dir: None,
            calls: CallsConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `max_changes` or `poll_interval_ms` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_changes == 0 {
            return Err(Error::Config {
                reason: "max_changes must be greater than 0".to_string(),
            });
        }
        if self.calls.poll_interval_ms == 0 {
            return Err(Error::Config {
                reason: "calls.poll_interval_ms must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# modelbus runtime configuration
#
# Number of change records retained for CHG queries (default: 100).
# Older records are evicted first.
max_changes = 100

# Directory scanned for annotated action scripts.
# actions_dir = "actions"

[calls]
# How often the supervising loop checks an async call (milliseconds).
poll_interval_ms = 100

# Async call output is delivered in chunks at this period (milliseconds).
output_buffer_ms = 100

# Timeout for async calls that do not set one (milliseconds, 0 = none).
default_timeout_ms = 0
"#
    }

    /// Read, parse and validate config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            reason: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;
        let config: RuntimeConfig = toml::from_str(&content).map_err(|e| Error::Config {
            reason: format!("Failed to parse config file '{}': {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| Error::Config {
                reason: format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ),
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config {
            reason: format!("Failed to serialize config: {}", e),
        })?;
        std::fs::write(path, content).map_err(|e| Error::Config {
            reason: format!("Failed to write config file '{}': {}", path.display(), e),
        })
    }
}
