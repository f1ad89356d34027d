//! Error types for the step engine
//!
//! Provides error handling for:
//! - Kernel round trips (transport failures and kernel-reported errors)
//! - Edit submission
//! - Import reconciliation
//! - Configuration loading

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Error reported by the kernel itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelErrorPayload {
    /// Kernel error class, e.g. `execution_error`
    pub error_type: String,
    /// Short headline
    pub header: String,
    /// What the user should do about it
    pub to_fix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl KernelErrorPayload {
    /// Create new payload
    #[must_use]
    pub fn new(
        error_type: impl Into<String>,
        header: impl Into<String>,
        to_fix: impl Into<String>,
    ) -> Self {
        Self {
            error_type: error_type.into(),
            header: header.into(),
            to_fix: to_fix.into(),
            traceback: None,
        }
    }

    /// Text shown to the user
    #[must_use]
    pub fn user_text(&self) -> String {
        if self.to_fix.trim().is_empty() {
            self.header.clone()
        } else {
            self.to_fix.clone()
        }
    }
}

/// Errors from a kernel round trip
///
/// Timeouts are handled identically to every other variant by callers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    /// The kernel processed the request and rejected it
    #[error("kernel error: {}", .0.header)]
    Kernel(KernelErrorPayload),

    /// No response within the channel's deadline
    #[error("no response after {millis}ms")]
    Timeout { millis: u64 },

    /// Transport closed before a response arrived
    #[error("channel disconnected")]
    Disconnected,

    /// Response did not have the expected shape
    #[error("could not decode response: {0}")]
    Decode(String),
}

impl ChannelError {
    /// Text shown to the user
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Kernel(payload) => payload.user_text(),
            other => other.to_string(),
        }
    }

    /// Whether the kernel rejected the request (as opposed to transport failure)
    #[inline]
    #[must_use]
    pub fn is_kernel_error(&self) -> bool {
        matches!(self, Self::Kernel(_))
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Errors submitting an edit
#[derive(Debug, Clone, thiserror::Error)]
pub enum EditError {
    /// The round trip failed
    #[error("edit failed: {0}")]
    Channel(#[from] ChannelError),

    /// Params could not be encoded for the kernel
    #[error("could not encode params: {0}")]
    Encode(String),

    /// The controller's driver has shut down
    #[error("edit controller closed")]
    ControllerClosed,
}

impl From<sheetstep_codec::CodecError> for EditError {
    fn from(err: sheetstep_codec::CodecError) -> Self {
        Self::Encode(err.to_string())
    }
}

/// Errors from the import reconciliation engine
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReconcileError {
    /// A kernel call failed
    #[error("kernel call failed: {0}")]
    Channel(#[from] ChannelError),

    /// Import data has not been loaded yet
    #[error("import data not loaded")]
    NotLoaded,

    /// Replacement targeted an import that does not exist
    #[error("import index {index} out of range ({len} imports)")]
    ImportIndexOutOfRange { index: usize, len: usize },

    /// Operation not valid in the current phase
    #[error("{operation} not allowed while {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: &'static str,
    },
}

impl ReconcileError {
    /// Whether this is a caller bug rather than a runtime failure
    #[inline]
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::ImportIndexOutOfRange { .. } | Self::InvalidPhase { .. } | Self::NotLoaded
        )
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}
