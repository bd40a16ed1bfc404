//! Error types for the Gatekeeper service.

use thiserror::Error;

/// A rule specification string was rejected.
///
/// The same variants reach remote callers: the HTTP layer carries the
/// [`kind`](RuleError::kind) alongside the [`detail`](RuleError::detail) so the
/// proxy can rebuild the error instead of matching on message text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// Malformed field, non-positive limit, bad duration or calendar period
    #[error("invalid rule: {0}")]
    InvalidRule(String),

    /// Field name other than `limit` or `reset`
    #[error("unknown field: {0}")]
    UnknownField(String),
}

impl RuleError {
    /// Stable identifier of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            RuleError::InvalidRule(_) => "invalid_rule",
            RuleError::UnknownField(_) => "unknown_field",
        }
    }

    /// The message without the kind prefix.
    pub fn detail(&self) -> &str {
        match self {
            RuleError::InvalidRule(detail) | RuleError::UnknownField(detail) => detail,
        }
    }

    /// Rebuild an error from its wire representation.
    pub fn from_kind(kind: &str, detail: impl Into<String>) -> Option<Self> {
        match kind {
            "invalid_rule" => Some(RuleError::InvalidRule(detail.into())),
            "unknown_field" => Some(RuleError::UnknownField(detail.into())),
            _ => None,
        }
    }
}

/// Main error type for Gatekeeper operations.
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rule validation errors, raised locally or reported by a remote authority
    #[error(transparent)]
    Rule(#[from] RuleError),

    /// The request never produced a response
    #[error("{operation} request failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The remote authority answered with a non-success status
    #[error("{operation} failed with status {status}: {message}")]
    Status {
        operation: &'static str,
        status: u16,
        message: String,
    },

    /// The response body could not be interpreted
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;
