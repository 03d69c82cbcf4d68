//! Event Hub
//!
//! Routes backend output and creation progress to whichever listeners are
//! attached, without knowing anything about the backend behind a session.
//!
//! - One data topic per session, opened when the session is registered and
//!   closed when it is torn down. Chunks are delivered in publish order.
//! - One status topic for all creation attempts, with a per-request guard that
//!   drops any step lower than one already delivered.
//! - One credential prompt topic.

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::listeners::{Callback, Listeners, Subscription};
use super::types::{ProgressStep, SessionStatusEvent};
use crate::credential::CredentialPromptEvent;

/// Default bytes of output retained for a session with no data subscriber
pub const DEFAULT_BACKLOG_BYTES: usize = 64 * 1024;

struct Backlog {
    chunks: VecDeque<Bytes>,
    bytes: usize,
}

impl Backlog {
    fn push(&mut self, chunk: Bytes, limit: usize) {
        if limit == 0 {
            return;
        }
        self.bytes += chunk.len();
        self.chunks.push_back(chunk);
        while self.bytes > limit {
            match self.chunks.pop_front() {
                Some(old) => self.bytes -= old.len(),
                None => break,
            }
        }
    }

    fn drain(&mut self) -> Vec<Bytes> {
        self.bytes = 0;
        self.chunks.drain(..).collect()
    }
}

struct SessionTopic {
    listeners: Arc<Listeners<Bytes>>,
    /// Output published while the topic had no listener
    backlog: Mutex<Backlog>,
}

impl SessionTopic {
    fn new() -> Self {
        Self {
            listeners: Arc::new(Listeners::new()),
            backlog: Mutex::new(Backlog {
                chunks: VecDeque::new(),
                bytes: 0,
            }),
        }
    }
}

/// Fan-out point between backends and external listeners
pub struct EventHub {
    sessions: DashMap<String, Arc<SessionTopic>>,
    status: Arc<Listeners<SessionStatusEvent>>,
    prompts: Arc<Listeners<CredentialPromptEvent>>,
    /// Highest step delivered per in-flight request
    progress: DashMap<String, ProgressStep>,
    backlog_limit: usize,
}

impl EventHub {
    pub fn new() -> Self {
        Self::with_backlog_limit(DEFAULT_BACKLOG_BYTES)
    }

    pub fn with_backlog_limit(backlog_limit: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            status: Arc::new(Listeners::new()),
            prompts: Arc::new(Listeners::new()),
            progress: DashMap::new(),
            backlog_limit,
        }
    }

    // ========================================================================
    // Session data
    // ========================================================================

    /// Open the data topic for a session (idempotent)
    pub fn open_session(&self, session_id: &str) {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(SessionTopic::new()));
    }

    /// Close a session's data topic.
    ///
    /// When this returns, no data callback for the session is running and
    /// none will run again.
    pub fn close_session(&self, session_id: &str) {
        if let Some((_, topic)) = self.sessions.remove(session_id) {
            topic.listeners.close();
            topic.backlog.lock().drain();
            debug!("Data topic closed for session {}", session_id);
        }
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    fn topic(&self, session_id: &str) -> Option<Arc<SessionTopic>> {
        self.sessions.get(session_id).map(|t| t.value().clone())
    }

    /// Deliver an output chunk to the session's subscribers.
    ///
    /// Returns `false` once the topic is gone, which tells the caller to stop
    /// pumping.
    pub fn publish(&self, session_id: &str, chunk: Bytes) -> bool {
        let Some(topic) = self.topic(session_id) else {
            trace!("Dropping {} bytes for closed session {}", chunk.len(), session_id);
            return false;
        };

        {
            let mut backlog = topic.backlog.lock();
            if topic.listeners.is_closed() {
                return false;
            }
            if topic.listeners.is_empty() {
                backlog.push(chunk, self.backlog_limit);
                return true;
            }
        }
        // Delivered with the backlog lock released so callbacks may call back into the hub
        topic.listeners.emit(&chunk)
    }

    /// Subscribe to a session's output.
    ///
    /// Output retained while nobody was listening is replayed first. An
    /// unknown session yields an inert subscription. The callback may
    /// unsubscribe itself or close the session.
    pub fn subscribe(
        &self,
        session_id: &str,
        on_data: impl Fn(Bytes) + Send + Sync + 'static,
    ) -> Subscription {
        let Some(topic) = self.topic(session_id) else {
            debug!("Subscribe to unknown session {} ignored", session_id);
            return Subscription::inert();
        };

        let callback: Callback<Bytes> = Arc::new(move |chunk: &Bytes| on_data(chunk.clone()));

        topic
            .listeners
            .add_with_replay(callback, || topic.backlog.lock().drain())
    }

    /// Channel adapter over [`EventHub::subscribe`] for async consumers
    pub fn subscribe_channel(
        &self,
        session_id: &str,
    ) -> (Subscription, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(session_id, move |chunk| {
            let _ = tx.send(chunk);
        });
        (subscription, rx)
    }

    // ========================================================================
    // Creation status
    // ========================================================================

    /// Publish a progress step for a creation attempt.
    ///
    /// Steps lower than one already delivered for the same request are
    /// dropped; returns whether the event was delivered.
    pub fn publish_status(&self, request_id: &str, step: ProgressStep) -> bool {
        {
            let mut last = self
                .progress
                .entry(request_id.to_string())
                .or_insert(step);
            if step < *last {
                debug!(
                    "Dropping out-of-order status {} after {} for {}",
                    step, *last, request_id
                );
                return false;
            }
            *last = step;
        }

        debug!("Session {} status -> {}", request_id, step);
        self.status.emit_detached(&SessionStatusEvent {
            request_id: request_id.to_string(),
            step,
        });
        true
    }

    /// Forget the progress guard of a finished creation attempt
    pub fn finish_request(&self, request_id: &str) {
        self.progress.remove(request_id);
    }

    pub fn subscribe_status(
        &self,
        on_status: impl Fn(&SessionStatusEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.status.add(Arc::new(on_status))
    }

    // ========================================================================
    // Credential prompts
    // ========================================================================

    pub fn publish_prompt(&self, event: CredentialPromptEvent) {
        debug!(
            "Credential prompt {} for {}@{}",
            event.request_id, event.username, event.host
        );
        self.prompts.emit_detached(&event);
    }

    pub fn subscribe_prompts(
        &self,
        on_prompt: impl Fn(&CredentialPromptEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.prompts.add(Arc::new(on_prompt))
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
