/// Error types for Sitzung session operations
use thiserror::Error;

/// Errors surfaced to callers of the session client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The server answered with a structured error body
    #[error("{message}")]
    Domain { status: u16, message: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Token refresh failed: {0}")]
    RefreshFailure(#[from] RefreshFailure),

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl SessionError {
    /// Message suitable for showing to a user
    ///
    /// Only server-provided messages are shown verbatim; everything else
    /// falls back to the caller's generic text.
    pub fn user_message<'a>(&'a self, fallback: &'a str) -> &'a str {
        match self {
            SessionError::Domain { message, .. } => message.as_str(),
            _ => fallback,
        }
    }

    /// HTTP status attached to the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            SessionError::Domain { status, .. } => Some(*status),
            SessionError::Transport(TransportError::Status { status }) => Some(*status),
            _ => None,
        }
    }

    /// Whether the session was ended because refreshing credentials failed
    pub fn is_refresh_failure(&self) -> bool {
        matches!(self, SessionError::RefreshFailure(_))
    }
}

/// Connection-level failures reported by a transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error("Unable to reach the server: {0}")]
    Connection(String),

    /// Non-success status without a structured error body
    #[error("Request failed with status {status}")]
    Status { status: u16 },

    #[error("Invalid request: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connection(err.to_string())
        } else if err.is_builder() {
            TransportError::Request(err.to_string())
        } else {
            TransportError::Connection(err.to_string())
        }
    }
}

/// Why a refresh episode ended without new credentials
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("refresh request failed: {0}")]
    Transport(TransportError),

    #[error("refresh rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),

    #[error("credential store failed: {0}")]
    Storage(String),

    /// The coordinator dropped a waiter without resolving it
    #[error("refresh episode ended without resolving this request")]
    Abandoned,
}

pub type Result<T> = std::result::Result<T, SessionError>;
