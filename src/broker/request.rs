//! Boundary request and response payloads

use serde::{Deserialize, Serialize};

use super::error::CreationError;
use crate::session::SessionTarget;

/// `{ "type": "local" }` or `{ "type": "remote", "hostId": "..." }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CreateSessionRequest {
    Local,
    Remote {
        #[serde(rename = "hostId")]
        host_id: String,
    },
}

impl CreateSessionRequest {
    pub fn local() -> Self {
        CreateSessionRequest::Local
    }

    pub fn remote(host_id: impl Into<String>) -> Self {
        CreateSessionRequest::Remote {
            host_id: host_id.into(),
        }
    }

    /// Validate and convert. A remote request must name a host.
    pub fn into_target(self) -> Result<SessionTarget, CreationError> {
        match self {
            CreateSessionRequest::Local => Ok(SessionTarget::Local),
            CreateSessionRequest::Remote { host_id } => {
                if host_id.is_empty() {
                    return Err(CreationError::InvalidRequest(
                        "hostId must not be empty".to_string(),
                    ));
                }
                Ok(SessionTarget::Remote { host_ref: host_id })
            }
        }
    }
}

/// `{ ok: true, sessionId }` or `{ ok: false, error, code }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl CreateSessionResponse {
    pub fn success(session_id: impl Into<String>) -> Self {
        Self {
            ok: true,
            session_id: Some(session_id.into()),
            error: None,
            code: None,
        }
    }

    pub fn failure(error: &CreationError) -> Self {
        Self {
            ok: false,
            session_id: None,
            error: Some(error.to_string()),
            code: Some(error.code().to_string()),
        }
    }
}

impl From<Result<String, CreationError>> for CreateSessionResponse {
    fn from(result: Result<String, CreationError>) -> Self {
        match result {
            Ok(id) => Self::success(id),
            Err(e) => Self::failure(&e),
        }
    }
}
