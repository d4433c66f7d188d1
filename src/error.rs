//! Error types for the AT Protocol client.
//!
//! Every fallible operation in the crate returns [`Result`], whose error side is
//! [`AtpError`]. Errors carry enough information to decide whether a call can be
//! replayed and how loudly it should be logged.
//!
//! Transport failures, rate limiting and 5xx responses are retryable; session,
//! record, file and configuration errors are not. An `ExpiredToken` XRPC error
//! is handled by the agent, which refreshes the session and replays once.
//!
//! ```rust
//! use nanoatp::AtpError;
//! use nanoatp::error::ErrorSeverity;
//!
//! fn report(error: &AtpError) {
//!     match error.severity() {
//!         ErrorSeverity::Warning => tracing::warn!("{error}"),
//!         ErrorSeverity::Error | ErrorSeverity::Critical => tracing::error!("{error}"),
//!     }
//! }
//! ```

use std::fmt;
use std::time::Duration;

/// Result type alias for AT Protocol client operations.
pub type Result<T> = std::result::Result<T, AtpError>;

/// Error code the service uses when an access JWT has expired.
pub const EXPIRED_TOKEN: &str = "ExpiredToken";

/// Comprehensive error type for AT Protocol client operations.
#[derive(Debug, thiserror::Error)]
pub enum AtpError {
    /// Network-related errors (retryable when the request never completed)
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Request timeout (retryable)
    #[error("Request timeout")]
    Timeout,

    /// An authenticated call was made without a session
    #[error("Not logged in")]
    NotLoggedIn,

    /// The service did not hand out a usable session
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    /// XRPC errors reported by the service (retryability depends on status)
    #[error("XRPC error [{status}] {error}: {message}")]
    Xrpc {
        status: u16,
        error: String,
        message: String,
    },

    /// Non-XRPC HTTP failures, e.g. while fetching a remote resource
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// Malformed AT URI
    #[error("Invalid AT URI: {uri}")]
    InvalidUri { uri: String },

    /// Argument outside its accepted range
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Record rejected by local validation
    #[error("Invalid record: {reason}")]
    InvalidRecord { reason: String },

    /// Payload exceeds a configured size limit
    #[error("Payload too large: {size} bytes (max: {limit} bytes)")]
    PayloadTooLarge { size: u64, limit: u64 },

    /// File system errors (not retryable)
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to read file: {path}, reason: {reason}")]
    FileRead { path: String, reason: String },

    /// Link card metadata could not be extracted
    #[error("Link metadata unavailable for {url}: {reason}")]
    LinkMetadata { url: String, reason: String },

    /// Configuration errors (not retryable)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON processing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing errors
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Generic errors for wrapping other error types
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AtpError {
    /// Determines if an error is retryable.
    ///
    /// Transport failures, timeouts, rate limiting and server-side failures are
    /// retryable. Everything produced locally is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            AtpError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            AtpError::Timeout => true,
            AtpError::Xrpc { status, .. } | AtpError::Http { status, .. } => {
                matches!(status, 429 | 500..=599)
            }
            _ => false,
        }
    }

    /// Whether replaying the request cannot produce a duplicate side effect.
    ///
    /// Only true when the request never reached the service or was turned away
    /// before processing (rate limited).
    pub fn is_safe_to_replay(&self) -> bool {
        match self {
            AtpError::Network(e) => e.is_connect(),
            AtpError::Xrpc { status, .. } | AtpError::Http { status, .. } => *status == 429,
            _ => false,
        }
    }

    /// Whether the service rejected the access JWT because it expired.
    pub fn is_expired_token(&self) -> bool {
        matches!(self, AtpError::Xrpc { error, .. } if error == EXPIRED_TOKEN)
    }

    /// Suggested delay before the next attempt, derived from a base delay.
    pub fn retry_delay(&self, base: Duration) -> Duration {
        match self {
            AtpError::Xrpc { status: 429, .. } | AtpError::Http { status: 429, .. } => base * 4,
            _ => base,
        }
    }

    /// Gets the severity level of the error for logging purposes.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            AtpError::Network(_) | AtpError::Timeout => ErrorSeverity::Warning,

            AtpError::NotLoggedIn | AtpError::AuthenticationFailed { .. } => {
                ErrorSeverity::Critical
            }

            AtpError::Xrpc { status, .. } => match status {
                429 => ErrorSeverity::Warning,
                401 | 403 => ErrorSeverity::Critical,
                _ => ErrorSeverity::Error,
            },

            AtpError::Http { .. }
            | AtpError::InvalidUri { .. }
            | AtpError::InvalidParameter { .. }
            | AtpError::InvalidRecord { .. }
            | AtpError::PayloadTooLarge { .. }
            | AtpError::FileNotFound { .. }
            | AtpError::FileRead { .. }
            | AtpError::LinkMetadata { .. }
            | AtpError::Config { .. }
            | AtpError::Json(_)
            | AtpError::Io(_)
            | AtpError::UrlParse(_)
            | AtpError::Internal(_) => ErrorSeverity::Error,
        }
    }

    /// Creates an XRPC error from an HTTP status and the service's error body.
    pub fn from_xrpc_response(
        status: u16,
        error: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        AtpError::Xrpc {
            status,
            error: error.into(),
            message: message.into(),
        }
    }

    /// Creates a file-related error.
    pub fn file_error(path: impl Into<String>, reason: impl Into<String>) -> Self {
        AtpError::FileRead {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config_error(message: impl Into<String>) -> Self {
        AtpError::Config {
            message: message.into(),
        }
    }

    /// Creates a record validation error.
    pub fn invalid_record(reason: impl Into<String>) -> Self {
        AtpError::InvalidRecord {
            reason: reason.into(),
        }
    }
}

/// Error severity levels for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Transient errors that a retry may fix
    Warning,
    /// Standard errors that affect specific operations
    Error,
    /// Errors that make every further authenticated call fail
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}
