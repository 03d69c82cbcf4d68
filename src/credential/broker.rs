//! Credential Prompt Broker
//!
//! Tracks authentication requests waiting on a human-supplied secret.
//!
//! ```text
//! Orchestrator                 Broker                        UI
//!    │── request_secret ───────▶│ register, then emit ───────▶│ prompt event
//!    │◀─ PendingSecret ─────────│                             │
//!    │   .wait() ...            │◀──────────── respond(id, s) │
//!    │◀─ Provided(s)/Cancelled ─│ entry removed               │
//! ```
//!
//! Each entry resolves exactly once. Responses for unknown or already
//! resolved ids are ignored.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info};

use super::types::{CredentialOutcome, CredentialPromptEvent, Secret};
use crate::events::EventHub;

struct PendingAuth {
    session_id: String,
    host: String,
    username: String,
    sender: oneshot::Sender<CredentialOutcome>,
}

/// Summary of an outstanding request (display only)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthInfo {
    pub request_id: String,
    pub session_id: String,
    pub host: String,
    pub username: String,
}

/// The waiting half of a credential request
#[must_use = "a pending secret does nothing unless awaited"]
pub struct PendingSecret {
    request_id: String,
    rx: oneshot::Receiver<CredentialOutcome>,
}

impl PendingSecret {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Suspend until the request is resolved.
    ///
    /// A request dropped without an answer (broker cancellation, shutdown)
    /// resolves as `Cancelled`.
    pub async fn wait(self) -> CredentialOutcome {
        self.rx.await.unwrap_or(CredentialOutcome::Cancelled)
    }
}

pub struct CredentialBroker {
    pending: Mutex<HashMap<String, PendingAuth>>,
    events: Arc<EventHub>,
}

impl CredentialBroker {
    pub fn new(events: Arc<EventHub>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Record a new pending request and notify prompt listeners.
    ///
    /// Returns immediately; await the returned [`PendingSecret`] separately.
    pub fn request_secret(
        &self,
        session_id: &str,
        host: &str,
        username: &str,
        prompt_label: &str,
    ) -> PendingSecret {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (sender, rx) = oneshot::channel();

        // Register before emitting so an immediate response finds the entry
        self.pending.lock().insert(
            request_id.clone(),
            PendingAuth {
                session_id: session_id.to_string(),
                host: host.to_string(),
                username: username.to_string(),
                sender,
            },
        );

        info!(
            "Credential request {} for {}@{} (session {})",
            request_id, username, host, session_id
        );

        self.events.publish_prompt(CredentialPromptEvent {
            request_id: request_id.clone(),
            session_id: session_id.to_string(),
            host: host.to_string(),
            username: username.to_string(),
            prompt_label: prompt_label.to_string(),
        });

        PendingSecret { request_id, rx }
    }

    /// Resolve a pending request with a secret, or cancel it with `None`.
    ///
    /// Returns whether a pending entry matched. Unknown ids are a no-op.
    pub fn respond(&self, request_id: &str, secret: Option<String>) -> bool {
        let Some(entry) = self.pending.lock().remove(request_id) else {
            debug!("Ignoring response for unknown credential request {}", request_id);
            return false;
        };

        let outcome = match secret {
            Some(value) => CredentialOutcome::Provided(Secret::new(value)),
            None => CredentialOutcome::Cancelled,
        };
        debug!(
            "Credential request {} resolved (cancelled: {})",
            request_id,
            outcome.is_cancelled()
        );
        // Receiver may already be gone if the creation attempt was aborted
        let _ = entry.sender.send(outcome);
        true
    }

    /// Cancel a pending request (timeout or session closed)
    pub fn cancel(&self, request_id: &str) -> bool {
        self.respond(request_id, None)
    }

    /// Cancel every request belonging to a session
    pub fn cancel_for_session(&self, session_id: &str) -> usize {
        let ids: Vec<String> = self
            .pending
            .lock()
            .iter()
            .filter(|(_, p)| p.session_id == session_id)
            .map(|(id, _)| id.clone())
            .collect();
        ids.iter().filter(|id| self.cancel(id)).count()
    }

    /// Cancel everything (broker shutdown)
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingAuth> = self.pending.lock().drain().map(|(_, p)| p).collect();
        let count = drained.len();
        for entry in drained {
            let _ = entry.sender.send(CredentialOutcome::Cancelled);
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn pending(&self) -> Vec<PendingAuthInfo> {
        self.pending
            .lock()
            .iter()
            .map(|(id, p)| PendingAuthInfo {
                request_id: id.clone(),
                session_id: p.session_id.clone(),
                host: p.host.clone(),
                username: p.username.clone(),
            })
            .collect()
    }
}
