//! Event payloads delivered to broker listeners

use serde::{Deserialize, Serialize};

/// Coarse progress of a session creation attempt.
///
/// Variants are declared in step order; `Ord` follows that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStep {
    Init,
    Connect,
    Auth,
    Shell,
}

impl ProgressStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStep::Init => "init",
            ProgressStep::Connect => "connect",
            ProgressStep::Auth => "auth",
            ProgressStep::Shell => "shell",
        }
    }
}

impl std::fmt::Display for ProgressStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event payload: creation progress for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    /// Creation attempt id (the session id being created)
    pub request_id: String,
    pub step: ProgressStep,
}
