use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StowageError {
    // IO
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Config
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found at {0} (run `stowage init` first)")]
    ConfigNotFound(String),

    #[error("TOML deserialization error: {0}")]
    TomlDe(String),

    #[error("TOML serialization error: {0}")]
    TomlSer(String),

    // Target
    #[error("Invalid target URI: {0}")]
    InvalidUri(String),

    #[error("Invalid key prefix: {0}")]
    InvalidPrefix(String),

    // Integrity
    #[error("Checksum is not a valid digest: {0}")]
    InvalidChecksum(#[from] hex::FromHexError),

    #[error("Checksum mismatch for {key}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    // Storage
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Backend is not initialized or has been closed")]
    NotInitialized,

    #[error("Backend is already initialized")]
    AlreadyInitialized,

    #[error("Restore of {key} did not complete within {waited:?}")]
    RestoreTimeout { key: String, waited: Duration },

    #[error("Listing was truncated without a continuation token")]
    MissingContinuationToken,

    // Run control
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Upload worker failed: {0}")]
    WorkerFailed(String),
}

impl StowageError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StowageError::Provider(e) => e.is_transient(),
            StowageError::Io(e) => is_retryable_io(e),
            _ => false,
        }
    }

    /// Whether the error reports a missing object or a missing local source.
    pub fn is_not_found(&self) -> bool {
        match self {
            StowageError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            StowageError::Provider(e) => e.kind == ProviderErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Whether an I/O error is transient and worth retrying.
pub fn is_retryable_io(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::Interrupted
    )
}

/// Coarse classification of a storage provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    NotFound,
    Throttled,
    Transient,
    /// A restore was requested for an object that is already being restored.
    RestoreInProgress,
    Permanent,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderErrorKind::NotFound => write!(f, "not found"),
            ProviderErrorKind::Throttled => write!(f, "throttled"),
            ProviderErrorKind::Transient => write!(f, "transient"),
            ProviderErrorKind::RestoreInProgress => write!(f, "restore in progress"),
            ProviderErrorKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// Provider-neutral error produced by a backend adapter.
#[derive(Debug, Clone, Error)]
#[error(
    "Provider error ({kind}{}): {message}",
    .code.as_deref().map(|c| format!(", {c}")).unwrap_or_default()
)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    /// Native error code reported by the provider, if any.
    pub code: Option<String>,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::Throttled | ProviderErrorKind::Transient
        )
    }
}

pub type Result<T> = std::result::Result<T, StowageError>;
