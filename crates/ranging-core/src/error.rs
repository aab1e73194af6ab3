//! Unified error types for the ranging core library.
//!
//! [`RangingError`] covers every failure mode in the crate. Note that the
//! coordinator itself never returns these across its public boundary: a
//! rejected ranging request is delivered as an [`Outcome`](crate::Outcome)
//! status and mirrored to the [`FailureObserver`](crate::FailureObserver).
//! Errors are *returned* only from construction and configuration loading.
//!
//! # Example
//!
//! ```rust
//! use ranging_core::error::{RangingError, Result};
//! use std::path::PathBuf;
//!
//! fn load(path: &PathBuf) -> Result<()> {
//!     if !path.exists() {
//!         return Err(RangingError::ConfigNotFound(path.clone()));
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{AuthorizationStatus, RangingStatus};

/// The unified error type for all ranging operations.
#[derive(Debug, Error)]
pub enum RangingError {
    // =========================================================================
    // REQUEST PRECONDITIONS
    // =========================================================================
    /// Location authorization is not `when_in_use` or `always`.
    #[error("Location permission not granted (status: {status}). Request when-in-use or always authorization.")]
    PermissionDenied {
        /// The authorization state at request time.
        status: AuthorizationStatus,
    },

    /// The platform cannot range beacons.
    #[error("Beacon ranging is unavailable. Ensure Bluetooth hardware is present and powered on.")]
    RadioUnavailable,

    // =========================================================================
    // RADIO ERRORS
    // =========================================================================
    /// The radio refused a start-ranging command.
    #[error("Radio failed to start ranging region '{region_id}': {message}")]
    RadioCommandFailed {
        /// Region the command was issued for.
        region_id: String,
        /// Adapter-provided detail.
        message: String,
    },

    // =========================================================================
    // CONSTRUCTION ERRORS
    // =========================================================================
    /// No tokio runtime was supplied or current when building the coordinator.
    #[error("No tokio runtime available. Build the coordinator inside a runtime or pass a handle.")]
    NoRuntime,

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration could not be parsed or serialized.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // I/O ERRORS
    // =========================================================================
    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for ranging operations.
pub type Result<T> = std::result::Result<T, RangingError>;

impl RangingError {
    /// The outcome status a request rejected with this error reports, if any.
    #[must_use]
    pub const fn outcome_status(&self) -> Option<RangingStatus> {
        match self {
            Self::PermissionDenied { .. } => Some(RangingStatus::PermissionDenied),
            Self::RadioUnavailable => Some(RangingStatus::RadioUnavailable),
            _ => None,
        }
    }

    /// Returns a machine-readable error code for logs and API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::PermissionDenied { .. } => "PERMISSION_DENIED",
            Self::RadioUnavailable => "RADIO_UNAVAILABLE",
            Self::RadioCommandFailed { .. } => "RADIO_COMMAND_FAILED",
            Self::NoRuntime => "NO_RUNTIME",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for RangingError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::Load(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::Serialize(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::Write { path, source } => Self::IoError(std::io::Error::new(
                source.kind(),
                format!("Failed to write {}: {source}", path.display()),
            )),
            ConfigError::Validation(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
