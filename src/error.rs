//! Error taxonomy shared by every coleta operation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ColetaError {
    /// A client-side precondition failed. No request was issued.
    #[error("{0}")]
    Validation(String),

    /// The API answered with a non-success status.
    #[error("{message} (HTTP {status})")]
    Request { status: u16, message: String },

    /// The request never completed (connect, timeout, TLS, ...).
    #[error("{0}")]
    Network(String),

    #[error("Not logged in")]
    NotAuthenticated,

    /// Local database or credential store failure.
    #[error("storage: {0}")]
    Storage(String),

    #[error("Invalid response from coleta API: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, ColetaError>;

impl ColetaError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Request { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// HTTP 401 means the bearer token is gone or expired; nothing short of a
    /// new login will make the call succeed.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::NotAuthenticated) || self.status() == Some(401)
    }

    /// Errors that may succeed on a later attempt without user action.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Request { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for ColetaError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ColetaError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}
