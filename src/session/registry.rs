//! Session Registry
//!
//! The authoritative map from session id to session state, built on DashMap.
//! Every mutation of one entry happens under that entry's shard lock, so
//! `create`, `attach_backend` and `remove` are atomic with respect to each
//! other and readers only ever see complete snapshots.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::state::{SessionState, StateError};
use super::types::{NewSession, SessionEntry, SessionInfo, SessionTarget};
use crate::backend::ShellBackend;

/// Default maximum concurrent sessions
pub const DEFAULT_MAX_SESSIONS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Session limit reached: {current}/{max} sessions active")]
    SessionLimitReached { current: usize, max: usize },

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session {id}: {source}")]
    InvalidTransition {
        id: String,
        #[source]
        source: StateError,
    },
}

pub struct SessionRegistry {
    sessions: DashMap<String, SessionEntry>,
    max_sessions: AtomicUsize,
    /// Makes the count check and the insert in `create` one step
    create_lock: parking_lot::Mutex<()>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_max_sessions(DEFAULT_MAX_SESSIONS)
    }

    pub fn with_max_sessions(max: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions: AtomicUsize::new(max),
            create_lock: parking_lot::Mutex::new(()),
        }
    }

    pub fn set_max_sessions(&self, max: usize) {
        self.max_sessions.store(max, Ordering::SeqCst);
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions.load(Ordering::SeqCst)
    }

    /// Register a new session in `Requested` with a fresh id
    pub fn create(&self, target: SessionTarget) -> Result<NewSession, RegistryError> {
        let _guard = self.create_lock.lock();

        let current = self.sessions.len();
        let max = self.max_sessions();
        if current >= max {
            return Err(RegistryError::SessionLimitReached { current, max });
        }

        let id = uuid::Uuid::new_v4().to_string();
        let entry = SessionEntry::new(id.clone(), target);
        let created = NewSession {
            info: entry.info(),
            cancel: entry.cancel.clone(),
        };

        info!(
            "Creating {} session {}{}",
            created.info.kind,
            id,
            created
                .info
                .host_ref
                .as_deref()
                .map(|h| format!(" (host {})", h))
                .unwrap_or_default()
        );
        self.sessions.insert(id, entry);
        Ok(created)
    }

    pub fn get(&self, id: &str) -> Option<SessionInfo> {
        self.sessions.get(id).map(|entry| entry.info())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn state(&self, id: &str) -> Option<SessionState> {
        self.sessions.get(id).map(|entry| entry.state())
    }

    /// Move a session along its lifecycle
    pub fn set_state(&self, id: &str, state: SessionState) -> Result<(), RegistryError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        // Streaming is only entered through attach_backend
        if state == SessionState::Streaming && entry.backend.is_none() {
            return Err(RegistryError::InvalidTransition {
                id: id.to_string(),
                source: StateError {
                    from: entry.state(),
                    to: state,
                },
            });
        }

        let from = entry
            .state_machine
            .transition(state)
            .map_err(|source| RegistryError::InvalidTransition {
                id: id.to_string(),
                source,
            })?;
        debug!("Session {} state {} -> {}", id, from, state);
        Ok(())
    }

    /// Hand a ready backend to its session and mark it `Streaming`.
    ///
    /// Fails with `NotFound` when the session was removed meanwhile; the
    /// caller still owns the backend then and must close it.
    pub fn attach_backend(
        &self,
        id: &str,
        backend: Arc<dyn ShellBackend>,
    ) -> Result<(), RegistryError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        entry
            .state_machine
            .transition(SessionState::Streaming)
            .map_err(|source| RegistryError::InvalidTransition {
                id: id.to_string(),
                source,
            })?;
        entry.backend = Some(backend);

        info!("Session {} streaming", id);
        Ok(())
    }

    /// Backend of a streaming session
    pub fn backend(&self, id: &str) -> Option<Arc<dyn ShellBackend>> {
        self.sessions
            .get(id)
            .and_then(|entry| entry.backend.clone())
    }

    /// Remove a session: cancel its creation flow if still running, close its
    /// backend if attached. Unknown ids are a no-op.
    pub async fn remove(&self, id: &str) -> Option<SessionInfo> {
        let (_, mut entry) = self.sessions.remove(id)?;

        entry.cancel.cancel();
        if entry.state_machine.transition(SessionState::Closed).is_err() {
            debug!("Session {} removed in terminal state {}", id, entry.state());
        }
        let info = entry.info();

        if let Some(backend) = entry.backend.take() {
            backend.close().await;
        }

        info!("Session {} removed", id);
        Some(info)
    }

    /// Snapshot of every session, oldest first
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self.sessions.iter().map(|e| e.info()).collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Remove every session (shutdown)
    pub async fn close_all(&self) -> usize {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut closed = 0;
        for id in ids {
            if self.remove(&id).await.is_some() {
                closed += 1;
            }
        }
        if closed > 0 {
            warn!("Closed {} sessions on shutdown", closed);
        }
        closed
    }
}
