//! Common error types for Conclave components.

use thiserror::Error;

/// Common errors across Conclave components
#[derive(Debug, Error)]
pub enum ConclaveError {
    /// Configuration error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input/request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Filesystem or socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Outbound peer exchange failed
    #[error("Peer error: {0}")]
    Peer(String),

    /// Certificate/key generation failed
    #[error("Credential error: {0}")]
    Credential(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl ConclaveError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Config(_) => 500,
            Self::InvalidInput(_) => 400,
            Self::Io(_) => 500,
            Self::Peer(_) => 502,
            Self::Credential(_) => 500,
            Self::Internal(_) => 500,
            Self::Timeout(_) => 504,
        }
    }

    /// Returns true if the failure is transient and the next cycle should retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Peer(_) | Self::Timeout(_))
    }
}
