use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("HTTP error {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server error: status code {status_code}, message: {message}")]
    ServerError {
        status_code: u16,
        message: String,
    },

    #[error("Request timed out")]
    Timeout,

    #[error("Event channel disconnected")]
    ChannelDisconnected,

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("IO error {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Session store shut down")]
    StoreShutdown,
}

impl SessionError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status_code,
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Network or service side failure, the kind worth retrying.
    pub fn is_transport(&self) -> bool {
        match self {
            SessionError::Http(err) => !err.is_decode(),
            SessionError::ServerError { status_code, .. } => *status_code >= 500,
            SessionError::Timeout => true,
            _ => false,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SessionError::Unauthorized(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SessionError::Channel(err.to_string())
    }
}

/// Error alias
pub type Result<T, E = SessionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(SessionError::Timeout.is_transport());
        assert!(SessionError::server_error(503, "unavailable").is_transport());
        assert!(!SessionError::server_error(409, "conflict").is_transport());
        assert!(!SessionError::not_found("1").is_transport());
        assert!(!SessionError::unauthorized("no token").is_transport());
        assert!(!SessionError::ChannelDisconnected.is_transport());
    }
}
