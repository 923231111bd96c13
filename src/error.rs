//! Error types for registry and cache operations

use thiserror::Error;

/// Errors raised by the registry client and the local cache.
///
/// Cancellation is deliberately absent: a cancelled download is reported
/// through [`crate::models::DownloadOutcome::Cancelled`], not as an error.
#[derive(Debug, Error)]
pub enum BazaarError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("You have to login to use this functionality")]
    LoginRequired,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("This model is already uploaded (hash {hash})")]
    Duplicate { hash: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Registry returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Malformed registry response: {0}")]
    MalformedResponse(String),

    #[error("Invalid identifier '{0}': expected author/model")]
    InvalidIdentifier(String),

    #[error("Download length unknown for {0}")]
    UnknownLength(String),

    #[error("Failed to unpack archive: {0}")]
    Unpack(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl BazaarError {
    /// Integrity failures must never be downgraded to warnings.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            BazaarError::SizeMismatch { .. } | BazaarError::HashMismatch { .. }
        )
    }

    /// Whether a caller-side retry with backoff could succeed.
    ///
    /// The core never retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            BazaarError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            BazaarError::Http { status, .. } => *status >= 500 || *status == 429,
            BazaarError::SizeMismatch { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BazaarError>;
