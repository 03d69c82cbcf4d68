//! Session Lifecycle Orchestrator
//!
//! Drives one creation attempt from registration to a streaming backend.
//!
//! ```text
//! local:   init ─────────────────────────────────────── spawn ── shell ── attach
//! remote:  init ── lookup ── connect ── (prompt)? ── auth ── connect+open ── shell ── attach
//! ```
//!
//! Every suspension point races the session's cancellation token, which the
//! registry fires when the session is closed mid-creation. Any failure
//! releases whatever was acquired and removes the session before the error
//! is returned.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::CreationError;
use crate::backend::{PtySpawner, RemoteEndpoint, RemoteTransport, ShellBackend};
use crate::config::{HostConfig, HostConfigProvider, TerminalSettings};
use crate::credential::{CredentialBroker, CredentialOutcome, Secret};
use crate::events::{EventHub, ProgressStep};
use crate::session::{NewSession, SessionRegistry, SessionState, SessionTarget};

pub(crate) struct Orchestrator {
    pub registry: Arc<SessionRegistry>,
    pub events: Arc<EventHub>,
    pub credentials: Arc<CredentialBroker>,
    pub hosts: Arc<dyn HostConfigProvider>,
    pub spawner: Arc<dyn PtySpawner>,
    pub transport: Arc<dyn RemoteTransport>,
    pub terminal: TerminalSettings,
    pub credential_timeout: Option<Duration>,
}

/// Run `fut` unless the session is closed first
async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    session_id: &str,
    fut: F,
) -> Result<F::Output, CreationError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("Creation of session {} cancelled", session_id);
            Err(CreationError::NotFound(session_id.to_string()))
        }
        out = fut => Ok(out),
    }
}

impl Orchestrator {
    pub async fn create_session(&self, target: SessionTarget) -> Result<String, CreationError> {
        let NewSession { info, cancel } = self.registry.create(target.clone())?;
        let id = info.id;

        self.events.open_session(&id);
        self.events.publish_status(&id, ProgressStep::Init);

        let acquired = match &target {
            SessionTarget::Local => self.acquire_local(&id, &cancel).await,
            SessionTarget::Remote { host_ref } => self.acquire_remote(&id, host_ref, &cancel).await,
        };

        let result = match acquired {
            Ok(backend) => match self.attach(&id, backend.clone(), &cancel) {
                Ok(()) => Ok(()),
                Err(e) => {
                    backend.close().await;
                    Err(e)
                }
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.events.finish_request(&id);
                info!("Session {} ready ({})", id, target.kind());
                Ok(id)
            }
            Err(e) => {
                warn!("Session {} creation failed: {}", id, e);
                self.abort(&id).await;
                Err(e)
            }
        }
    }

    async fn acquire_local(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn ShellBackend>, CreationError> {
        self.registry.set_state(id, SessionState::Acquiring)?;

        let request = self.terminal.spawn_request();
        let backend = until_cancelled(cancel, id, self.spawner.spawn(request))
            .await?
            .map_err(|e| CreationError::BackendUnavailable(e.to_string()))?;

        self.events.publish_status(id, ProgressStep::Shell);
        Ok(backend)
    }

    async fn acquire_remote(
        &self,
        id: &str,
        host_ref: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn ShellBackend>, CreationError> {
        self.registry.set_state(id, SessionState::Acquiring)?;

        let host = until_cancelled(cancel, id, self.hosts.lookup_host(host_ref))
            .await?
            .ok_or_else(|| CreationError::UnknownHost(host_ref.to_string()))?;

        self.events.publish_status(id, ProgressStep::Connect);

        let secret = self.obtain_secret(id, &host, cancel).await?;

        self.registry.set_state(id, SessionState::Authenticating)?;
        self.events.publish_status(id, ProgressStep::Auth);

        let endpoint = RemoteEndpoint {
            address: host.address.clone(),
            port: host.port,
            username: host.username.clone(),
        };
        let connection = until_cancelled(cancel, id, self.transport.connect(&endpoint, &secret))
            .await?
            .map_err(|e| CreationError::ConnectFailed(e.to_string()))?;
        drop(secret);

        let opened = until_cancelled(
            cancel,
            id,
            connection.open_shell(self.terminal.cols, self.terminal.rows),
        )
        .await;

        let backend = match opened {
            Ok(Ok(backend)) => backend,
            Ok(Err(e)) => {
                connection.close().await;
                return Err(CreationError::ShellFailed(e.to_string()));
            }
            Err(cancelled) => {
                connection.close().await;
                return Err(cancelled);
            }
        };

        self.events.publish_status(id, ProgressStep::Shell);
        Ok(backend)
    }

    /// Stored secret, or one typed by the user through the credential broker
    async fn obtain_secret(
        &self,
        id: &str,
        host: &HostConfig,
        cancel: &CancellationToken,
    ) -> Result<Secret, CreationError> {
        if let Some(secret) = host.stored_secret() {
            debug!("Using stored secret for host {}", host.id);
            return Ok(secret);
        }

        self.registry.set_state(id, SessionState::AwaitingCredential)?;

        let label = format!("Password for {}@{}:", host.username, host.address);
        let pending = self
            .credentials
            .request_secret(id, &host.address, &host.username, &label);
        let request_id = pending.request_id().to_string();

        let timeout = self.credential_timeout;
        let wait = async move {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, pending.wait()).await.ok(),
                None => Some(pending.wait().await),
            }
        };

        let outcome = match until_cancelled(cancel, id, wait).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.credentials.cancel(&request_id);
                return Err(e);
            }
        };

        match outcome {
            Some(CredentialOutcome::Provided(secret)) => Ok(secret),
            Some(CredentialOutcome::Cancelled) => {
                info!("Credential request {} cancelled", request_id);
                Err(CreationError::AuthenticationCancelled)
            }
            None => {
                warn!("Credential request {} timed out", request_id);
                self.credentials.cancel(&request_id);
                Err(CreationError::AuthenticationCancelled)
            }
        }
    }

    /// Route backend output into the event hub and hand the backend to the registry
    fn attach(
        &self,
        id: &str,
        backend: Arc<dyn ShellBackend>,
        cancel: &CancellationToken,
    ) -> Result<(), CreationError> {
        if cancel.is_cancelled() {
            return Err(CreationError::NotFound(id.to_string()));
        }

        let events = self.events.clone();
        let session_id = id.to_string();
        // Lives as long as the backend: closing the backend drops the listener
        let _wiring = backend.subscribe(Box::new(move |chunk| {
            events.publish(&session_id, chunk);
        }));

        self.registry.attach_backend(id, backend)?;
        Ok(())
    }

    /// Release everything tied to a failed attempt
    async fn abort(&self, id: &str) {
        self.events.close_session(id);
        self.credentials.cancel_for_session(id);
        if self.registry.set_state(id, SessionState::Failed).is_ok() {
            debug!("Session {} marked failed", id);
        }
        self.registry.remove(id).await;
        self.events.finish_request(id);
    }
}
