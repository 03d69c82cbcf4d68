//! Session lifecycle state machine
//!
//! ```text
//! Requested → Acquiring → (AwaitingCredential)? → Authenticating → Streaming → Closed
//!                 └──────────────── local ────────────────────────────┘
//! ```
//!
//! `Failed` is reachable from every non-terminal state. `Closed` may also be
//! entered from any non-terminal state (closed before creation finished).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Requested,
    Acquiring,
    AwaitingCredential,
    Authenticating,
    Streaming,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Requested => "requested",
            SessionState::Acquiring => "acquiring",
            SessionState::AwaitingCredential => "awaiting_credential",
            SessionState::Authenticating => "authenticating",
            SessionState::Streaming => "streaming",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }

    /// Whether `self → next` is a legal edge
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Failed) | (_, Closed) => true,
            (Requested, Acquiring) => true,
            (Acquiring, AwaitingCredential) => true,
            (Acquiring, Authenticating) => true,
            (Acquiring, Streaming) => true,
            (AwaitingCredential, Authenticating) => true,
            (Authenticating, Streaming) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition {from} -> {to}")]
pub struct StateError {
    pub from: SessionState,
    pub to: SessionState,
}

/// Current state plus transition validation
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: SessionState,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Requested,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transition(&mut self, to: SessionState) -> Result<SessionState, StateError> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(StateError { from, to });
        }
        self.state = to;
        Ok(from)
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
