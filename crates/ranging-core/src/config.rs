//! Coordinator and host configuration.
//!
//! Configuration is layered with the `config` crate:
//!
//! 1. Built-in defaults ([`RangingConfig::default`])
//! 2. A TOML file: an explicit path, else `$RANGING_CONFIG`, else the
//!    platform config directory (`.../beacon-ranging/config.toml`)
//! 3. Environment overrides: `RANGING__<SECTION>__<KEY>`, for example
//!    `RANGING__RANGING__TIMEOUT_SECS=10`
//!
//! ```toml
//! [ranging]
//! timeout_secs = 5
//!
//! [radio]
//! backend = "simulated"
//! available = true
//!
//! [permission]
//! authorization = "always"
//!
//! [server]
//! host = "127.0.0.1"
//! port = 3000
//!
//! [logging]
//! production = false
//! level = "info"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::AuthorizationStatus;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_PATH_ENV: &str = "RANGING_CONFIG";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "RANGING";

/// Upper bound accepted for `ranging.timeout_secs`.
pub const MAX_TIMEOUT_SECS: u64 = 300;

// ============================================================================
// Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested configuration file does not exist.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A source could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    /// The configuration could not be serialized to TOML.
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The configuration file could not be written.
    #[error("Failed to write configuration to {}: {source}", path.display())]
    Write {
        /// Destination path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// One or more values are out of range.
    #[error("Invalid configuration: {}", format_issues(.0))]
    Validation(Vec<ValidationIssue>),
}

/// A single rejected configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Dotted key of the offending value.
    pub field: &'static str,
    /// What is wrong with it.
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Sections
// ============================================================================

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangingConfig {
    /// Coordinator behaviour.
    pub ranging: RangingSettings,
    /// Radio backend selection.
    pub radio: RadioSettings,
    /// Static permission provider.
    pub permission: PermissionSettings,
    /// HTTP host bind address.
    pub server: ServerSettings,
    /// Logging output.
    pub logging: LoggingSettings,
}

/// Coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangingSettings {
    /// Seconds each pending completion waits before forcing a stop.
    pub timeout_secs: u64,
}

impl Default for RangingSettings {
    fn default() -> Self {
        Self { timeout_secs: 5 }
    }
}

impl RangingSettings {
    /// The timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Which radio adapter the host wires into the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadioBackend {
    /// In-process adapter fed by injected events.
    #[default]
    Simulated,
    /// BlueZ over D-Bus (requires the `bluez` feature).
    Bluez,
}

/// Radio settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioSettings {
    /// Adapter backend.
    pub backend: RadioBackend,
    /// Whether the simulated radio reports ranging capability.
    pub available: bool,
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self {
            backend: RadioBackend::Simulated,
            available: true,
        }
    }
}

/// Permission settings for hosts without a platform permission API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionSettings {
    /// Authorization state reported to the coordinator.
    pub authorization: AuthorizationStatus,
}

impl Default for PermissionSettings {
    fn default() -> Self {
        Self {
            authorization: AuthorizationStatus::Always,
        }
    }
}

/// HTTP host settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Interface to bind.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// JSON file logging plus compact stdout when `true`.
    pub production: bool,
    /// Fallback filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            production: false,
            level: "info".to_string(),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl RangingConfig {
    /// Load configuration from defaults, a TOML file, and the environment.
    ///
    /// An explicit `path` must exist. Without one, `$RANGING_CONFIG` and then
    /// the platform default location are tried; a missing default file is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed, an explicit file is
    /// missing, or validation fails.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let (file, required) = match path {
            Some(p) => (Some(p.to_path_buf()), true),
            None => match std::env::var_os(CONFIG_PATH_ENV) {
                Some(p) => (Some(PathBuf::from(p)), true),
                None => (default_config_path(), false),
            },
        };

        if let Some(file) = file.as_ref().filter(|_| required) {
            if !file.exists() {
                return Err(ConfigError::NotFound(file.clone()));
            }
        }

        let mut builder =
            ::config::Config::builder().add_source(::config::Config::try_from(&Self::default())?);

        if let Some(file) = file {
            tracing::debug!(path = %file.display(), required, "Loading configuration file");
            builder = builder.add_source(
                ::config::File::from(file)
                    .format(::config::FileFormat::Toml)
                    .required(required),
            );
        }

        let config: Self = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string, without file or environment
    /// layers.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or validation fails.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = ::config::Config::builder()
            .add_source(::config::Config::try_from(&Self::default())?)
            .add_source(::config::File::from_str(
                content,
                ::config::FileFormat::Toml,
            ))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check every value, collecting all problems rather than stopping at
    /// the first.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] listing each invalid field.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut issues = Vec::new();

        if self.ranging.timeout_secs == 0 {
            issues.push(ValidationIssue {
                field: "ranging.timeout_secs",
                message: "must be greater than zero".to_string(),
            });
        } else if self.ranging.timeout_secs > MAX_TIMEOUT_SECS {
            issues.push(ValidationIssue {
                field: "ranging.timeout_secs",
                message: format!("must be at most {MAX_TIMEOUT_SECS}"),
            });
        }

        if self.server.port == 0 {
            issues.push(ValidationIssue {
                field: "server.port",
                message: "must be a non-zero TCP port".to_string(),
            });
        }

        if self.server.host.trim().is_empty() {
            issues.push(ValidationIssue {
                field: "server.host",
                message: "must not be empty".to_string(),
            });
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(issues))
        }
    }

    /// Serialize to pretty TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the configuration to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = self.to_toml()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// The platform default configuration file, if a home directory is known.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "beacon-ranging")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RangingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ranging.timeout(), Duration::from_secs(5));
        assert_eq!(config.radio.backend, RadioBackend::Simulated);
        assert_eq!(
            config.permission.authorization,
            AuthorizationStatus::Always
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RangingConfig::from_toml_str(
            r#"
            [ranging]
            timeout_secs = 12

            [permission]
            authorization = "when_in_use"
            "#,
        )
        .unwrap();

        assert_eq!(config.ranging.timeout_secs, 12);
        assert_eq!(
            config.permission.authorization,
            AuthorizationStatus::WhenInUse
        );
        assert_eq!(config.server.port, 3000);
        assert!(config.radio.available);
    }

    #[test]
    fn test_validation_collects_every_issue() {
        let mut config = RangingConfig::default();
        config.ranging.timeout_secs = 0;
        config.server.port = 0;

        match config.validate() {
            Err(ConfigError::Validation(issues)) => {
                assert_eq!(issues.len(), 2);
                assert_eq!(issues[0].field, "ranging.timeout_secs");
                assert_eq!(issues[1].field, "server.port");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_timeout_upper_bound() {
        let mut config = RangingConfig::default();
        config.ranging.timeout_secs = MAX_TIMEOUT_SECS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_then_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = RangingConfig::default();
        config.ranging.timeout_secs = 9;
        config.radio.available = false;
        config.save(&path).unwrap();

        let loaded = RangingConfig::load(Some(path.as_path())).unwrap();
        assert_eq!(loaded.ranging.timeout_secs, 9);
        assert!(!loaded.radio.available);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");

        let err = RangingConfig::load(Some(path.as_path())).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_malformed_toml_is_load_error() {
        let err = RangingConfig::from_toml_str("[ranging\ntimeout_secs = ").unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn test_config_error_converts_to_unified_error() {
        let err: crate::RangingError =
            ConfigError::NotFound(PathBuf::from("/etc/ranging.toml")).into();
        assert!(matches!(err, crate::RangingError::ConfigNotFound(_)));
    }
}
