//! Session Broker
//!
//! The boundary API: create, drive and close sessions, and subscribe to their
//! output, creation status and credential prompts.
//!
//! Write, resize and close against unknown or closed sessions are silent
//! no-ops. Teardown races with in-flight events are expected.

mod error;
mod orchestrator;
pub mod request;

pub use error::CreationError;
pub use request::{CreateSessionRequest, CreateSessionResponse};

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use self::orchestrator::Orchestrator;
use crate::backend::{PtySpawner, RemoteTransport};
use crate::config::{BrokerConfig, HostConfigProvider, MemoryHostStore};
use crate::credential::{CredentialBroker, CredentialPromptEvent, PendingAuthInfo};
use crate::events::{EventHub, SessionStatusEvent, Subscription};
use crate::session::{SessionInfo, SessionRegistry, SessionTarget};
use crate::ssh::RusshTransport;

pub struct SessionBroker {
    registry: Arc<SessionRegistry>,
    events: Arc<EventHub>,
    credentials: Arc<CredentialBroker>,
    orchestrator: Orchestrator,
}

/// Assembles a [`SessionBroker`]. Unset collaborators get production defaults.
pub struct SessionBrokerBuilder {
    config: BrokerConfig,
    hosts: Option<Arc<dyn HostConfigProvider>>,
    spawner: Option<Arc<dyn PtySpawner>>,
    transport: Option<Arc<dyn RemoteTransport>>,
}

impl SessionBrokerBuilder {
    pub fn config(mut self, config: BrokerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn hosts(mut self, hosts: Arc<dyn HostConfigProvider>) -> Self {
        self.hosts = Some(hosts);
        self
    }

    pub fn pty_spawner(mut self, spawner: Arc<dyn PtySpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn RemoteTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> SessionBroker {
        let config = self.config;

        let registry = Arc::new(SessionRegistry::with_max_sessions(config.max_sessions));
        let events = Arc::new(EventHub::with_backlog_limit(config.data_backlog_bytes));
        let credentials = Arc::new(CredentialBroker::new(events.clone()));

        let hosts = self
            .hosts
            .unwrap_or_else(|| Arc::new(MemoryHostStore::new()));
        let spawner = self.spawner.unwrap_or_else(default_spawner);
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(RusshTransport::new(config.ssh.clone())));

        let orchestrator = Orchestrator {
            registry: registry.clone(),
            events: events.clone(),
            credentials: credentials.clone(),
            hosts,
            spawner,
            transport,
            terminal: config.terminal.clone(),
            credential_timeout: config.credential_timeout(),
        };

        SessionBroker {
            registry,
            events,
            credentials,
            orchestrator,
        }
    }
}

#[cfg(feature = "local-terminal")]
fn default_spawner() -> Arc<dyn PtySpawner> {
    Arc::new(crate::local::NativePtySpawner::new())
}

#[cfg(not(feature = "local-terminal"))]
fn default_spawner() -> Arc<dyn PtySpawner> {
    Arc::new(crate::backend::UnsupportedPtySpawner)
}

impl SessionBroker {
    pub fn builder() -> SessionBrokerBuilder {
        SessionBrokerBuilder {
            config: BrokerConfig::default(),
            hosts: None,
            spawner: None,
            transport: None,
        }
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Boundary form of [`SessionBroker::try_create_session`]
    pub async fn create_session(&self, request: CreateSessionRequest) -> CreateSessionResponse {
        let result = match request.into_target() {
            Ok(target) => self.try_create_session(target).await,
            Err(e) => Err(e),
        };
        result.into()
    }

    /// Create a session and wait until it is streaming
    pub async fn try_create_session(&self, target: SessionTarget) -> Result<String, CreationError> {
        self.orchestrator.create_session(target).await
    }

    // ========================================================================
    // Session I/O
    // ========================================================================

    pub async fn write_to_session(&self, session_id: &str, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let Some(backend) = self.registry.backend(session_id) else {
            debug!("Write to unknown session {} ignored", session_id);
            return;
        };
        if let Err(e) = backend.write(data).await {
            warn!("Write to session {} failed: {}", session_id, e);
        }
    }

    pub async fn resize_session(&self, session_id: &str, cols: u16, rows: u16) {
        if cols == 0 || rows == 0 {
            debug!("Ignoring resize of {} to {}x{}", session_id, cols, rows);
            return;
        }
        let Some(backend) = self.registry.backend(session_id) else {
            return;
        };
        if let Err(e) = backend.resize(cols, rows).await {
            warn!("Resize of session {} failed: {}", session_id, e);
        }
    }

    /// Close a session (also one still being created). Idempotent.
    ///
    /// When this returns no further data callback fires for the session.
    pub async fn close_session(&self, session_id: &str) {
        self.events.close_session(session_id);
        self.credentials.cancel_for_session(session_id);
        if self.registry.remove(session_id).await.is_some() {
            info!("Session {} closed", session_id);
        }
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Output of one session, starting with anything produced while nobody was
    /// subscribed
    pub fn on_session_data(
        &self,
        session_id: &str,
        on_data: impl Fn(Bytes) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.subscribe(session_id, on_data)
    }

    pub fn session_data_channel(
        &self,
        session_id: &str,
    ) -> (Subscription, mpsc::UnboundedReceiver<Bytes>) {
        self.events.subscribe_channel(session_id)
    }

    /// Creation progress of every attempt; `requestId` is the session id
    pub fn on_session_status(
        &self,
        on_status: impl Fn(&SessionStatusEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.subscribe_status(on_status)
    }

    pub fn on_credential_prompt(
        &self,
        on_prompt: impl Fn(&CredentialPromptEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.subscribe_prompts(on_prompt)
    }

    /// Answer a prompt; `None` cancels. Unknown ids are ignored.
    pub fn respond_to_credential_prompt(&self, request_id: &str, secret: Option<String>) {
        self.credentials.respond(request_id, secret);
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn session(&self, session_id: &str) -> Option<SessionInfo> {
        self.registry.get(session_id)
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.registry.list()
    }

    pub fn pending_credentials(&self) -> Vec<PendingAuthInfo> {
        self.credentials.pending()
    }

    /// Close every session and cancel every pending prompt
    pub async fn shutdown(&self) {
        let cancelled = self.credentials.cancel_all();
        if cancelled > 0 {
            debug!("Cancelled {} pending credential requests", cancelled);
        }
        for info in self.registry.list() {
            self.close_session(&info.id).await;
        }
        info!("Session broker shut down");
    }
}
