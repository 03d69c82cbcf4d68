//! Session creation errors

use crate::session::RegistryError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CreationError {
    #[error("Unknown host: {0}")]
    UnknownHost(String),

    #[error("Authentication cancelled")]
    AuthenticationCancelled,

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Shell failed: {0}")]
    ShellFailed(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session limit reached ({max} sessions)")]
    SessionLimitReached { max: usize },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl CreationError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            CreationError::UnknownHost(_) => "unknown_host",
            CreationError::AuthenticationCancelled => "authentication_cancelled",
            CreationError::ConnectFailed(_) => "connect_failed",
            CreationError::ShellFailed(_) => "shell_failed",
            CreationError::BackendUnavailable(_) => "backend_unavailable",
            CreationError::NotFound(_) => "not_found",
            CreationError::SessionLimitReached { .. } => "session_limit_reached",
            CreationError::InvalidRequest(_) => "invalid_request",
        }
    }
}

impl From<RegistryError> for CreationError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::SessionLimitReached { max, .. } => {
                CreationError::SessionLimitReached { max }
            }
            RegistryError::NotFound(id) => CreationError::NotFound(id),
            // A session that left the live states was closed underneath us
            RegistryError::InvalidTransition { id, .. } => CreationError::NotFound(id),
        }
    }
}

impl serde::Serialize for CreationError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
