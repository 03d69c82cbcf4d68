//! Session Types and Data Structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::state::{SessionState, SessionStateMachine};
use crate::backend::ShellBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Local,
    Remote,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionKind::Local => "local",
            SessionKind::Remote => "remote",
        }
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a session runs. A remote target always names its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTarget {
    Local,
    Remote { host_ref: String },
}

impl SessionTarget {
    pub fn remote(host_ref: impl Into<String>) -> Self {
        SessionTarget::Remote {
            host_ref: host_ref.into(),
        }
    }

    pub fn kind(&self) -> SessionKind {
        match self {
            SessionTarget::Local => SessionKind::Local,
            SessionTarget::Remote { .. } => SessionKind::Remote,
        }
    }

    pub fn host_ref(&self) -> Option<&str> {
        match self {
            SessionTarget::Local => None,
            SessionTarget::Remote { host_ref } => Some(host_ref),
        }
    }
}

/// Session snapshot for callers outside the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub kind: SessionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
}

/// Registry entry
pub(crate) struct SessionEntry {
    pub id: String,
    pub target: SessionTarget,
    pub created_at: DateTime<Utc>,
    pub state_machine: SessionStateMachine,
    pub backend: Option<Arc<dyn ShellBackend>>,
    /// Fired when the entry is removed so in-flight creation can abort
    pub cancel: CancellationToken,
}

impl SessionEntry {
    pub fn new(id: String, target: SessionTarget) -> Self {
        Self {
            id,
            target,
            created_at: Utc::now(),
            state_machine: SessionStateMachine::new(),
            backend: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state_machine.state()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            kind: self.target.kind(),
            host_ref: self.target.host_ref().map(str::to_string),
            created_at: self.created_at,
            state: self.state(),
        }
    }
}

/// A freshly registered session handed to its creation flow
#[derive(Debug, Clone)]
pub struct NewSession {
    pub info: SessionInfo,
    /// Cancelled when the session is closed before creation finishes
    pub cancel: CancellationToken,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_kind_and_host() {
        assert_eq!(SessionTarget::Local.kind(), SessionKind::Local);
        assert_eq!(SessionTarget::Local.host_ref(), None);

        let remote = SessionTarget::remote("db-1");
        assert_eq!(remote.kind(), SessionKind::Remote);
        assert_eq!(remote.host_ref(), Some("db-1"));
    }

    #[test]
    fn test_info_serialization() {
        let entry = SessionEntry::new("s1".into(), SessionTarget::Local);
        let json = serde_json::to_value(entry.info()).unwrap();
        assert_eq!(json["id"], "s1");
        assert_eq!(json["kind"], "local");
        assert_eq!(json["state"], "requested");
        assert!(json.get("hostRef").is_none());
        assert!(json.get("createdAt").is_some());
    }
}
