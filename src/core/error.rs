use chrono::{DateTime, Utc};
use thiserror::Error;

/// Caller-visible error taxonomy for the data-access layer.
///
/// Infrastructure failures (cache I/O, serialization, ledger writes) are
/// absorbed internally and never surface through this type; only validation,
/// quota denials and classified upstream outcomes do.
#[derive(Error, Debug, Clone)]
pub enum DataAccessError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Quota exceeded for {endpoint}, resets at {reset_at}")]
    QuotaExceeded {
        endpoint: String,
        remaining: u32,
        reset_at: DateTime<Utc>,
    },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Upstream server error: HTTP {status}")]
    Server { status: u16 },

    #[error("Request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Unclassified upstream response: HTTP {status}: {detail}")]
    Unclassified { status: u16, detail: String },
}

impl DataAccessError {
    /// Seconds until the caller can reasonably retry, where one is known.
    pub fn retry_after_hint(&self) -> Option<u64> {
        match self {
            DataAccessError::QuotaExceeded { reset_at, .. } => {
                let delta = reset_at.signed_duration_since(Utc::now()).num_seconds();
                Some(delta.max(0) as u64)
            }
            DataAccessError::Server { .. } => Some(30),
            DataAccessError::Timeout { .. } => Some(5),
            DataAccessError::Connection(_) => Some(10),
            _ => None,
        }
    }

    /// Auth errors are configuration problems at the portal boundary, not
    /// end-user credential problems.
    pub fn is_configuration_problem(&self) -> bool {
        matches!(self, DataAccessError::Auth(_))
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            DataAccessError::Validation(_) => None,
            DataAccessError::QuotaExceeded { .. } => Some(ErrorKind::RateLimited),
            DataAccessError::Auth(_) => Some(ErrorKind::Auth),
            DataAccessError::Server { .. } => Some(ErrorKind::Server),
            DataAccessError::Timeout { .. } => Some(ErrorKind::Timeout),
            DataAccessError::Connection(_) => Some(ErrorKind::Connection),
            DataAccessError::Unclassified { .. } => Some(ErrorKind::Unclassified),
        }
    }
}

/// Classification of a single upstream outcome.
///
/// Drives the retry decision and is what the usage ledger stores in its
/// `error_kind` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RateLimited,
    Auth,
    NotFound,
    Server,
    Timeout,
    Connection,
    Unclassified,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::Server | ErrorKind::Timeout | ErrorKind::Connection
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Auth => "auth",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Server => "server",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Connection => "connection",
            ErrorKind::Unclassified => "unclassified",
        }
    }
}

pub type DataResult<T> = Result<T, DataAccessError>;
