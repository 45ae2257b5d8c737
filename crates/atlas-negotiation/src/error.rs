//! Error types for the negotiation engine
//!
//! Only configuration, I/O and collaborator failures are errors. A required
//! field without evidence is a negotiation outcome, not an `Err`.

use thiserror::Error;

use crate::augmenter::AugmentationError;
use crate::document::DocumentError;
use crate::ledger::LedgerError;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum NegotiationError {
    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// File access or I/O error
    #[error("File error: {0}")]
    Io(String),

    /// Parse error for configs, contracts or snapshots
    #[error("Parse error: {0}")]
    Parse(String),

    /// DOM access failure
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// Augmentation call failure
    #[error(transparent)]
    Augmentation(#[from] AugmentationError),

    /// Evidence ledger failure
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl NegotiationError {
    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        NegotiationError::InvalidConfig(msg.into())
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        NegotiationError::Parse(msg.into())
    }

    /// Check if this is a caller-facing error (vs collaborator failure)
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            NegotiationError::InvalidConfig(_) | NegotiationError::Io(_) | NegotiationError::Parse(_)
        )
    }
}

impl From<std::io::Error> for NegotiationError {
    fn from(err: std::io::Error) -> Self {
        NegotiationError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for NegotiationError {
    fn from(err: serde_json::Error) -> Self {
        NegotiationError::Parse(format!("JSON error: {}", err))
    }
}

impl From<serde_yaml::Error> for NegotiationError {
    fn from(err: serde_yaml::Error) -> Self {
        NegotiationError::Parse(format!("YAML error: {}", err))
    }
}

impl From<toml::de::Error> for NegotiationError {
    fn from(err: toml::de::Error) -> Self {
        NegotiationError::Parse(format!("TOML error: {}", err))
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, NegotiationError>;
