//! SSH transport built on russh
//!
//! [`RusshTransport`] connects and authenticates with a password;
//! [`RusshConnection`] opens the interactive shell channel on top.

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::PublicKey;
use tracing::{debug, info, warn};

use super::channel::RemoteShellBackend;
use super::config::SshSettings;
use super::error::SshError;
use super::known_hosts::{HostKeyVerification, KnownHostsStore};
use crate::backend::{
    RemoteEndpoint, RemoteTransport, ShellBackend, TransportConnection, TransportError,
};
use crate::credential::Secret;

/// Client handler for russh callbacks (host key verification)
pub struct ClientHandler {
    host: String,
    port: u16,
    /// - true: reject unknown and changed keys
    /// - false: accept and record unknown keys, still reject changed
    strict: bool,
    known_hosts: Arc<KnownHostsStore>,
}

impl ClientHandler {
    pub fn new(host: String, port: u16, strict: bool, known_hosts: Arc<KnownHostsStore>) -> Self {
        Self {
            host,
            port,
            strict,
            known_hosts,
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        match self
            .known_hosts
            .verify(&self.host, self.port, server_public_key)
        {
            HostKeyVerification::Verified => {
                info!("Host key verified for {}:{}", self.host, self.port);
                Ok(true)
            }
            HostKeyVerification::Unknown { fingerprint } => {
                if self.strict {
                    warn!(
                        "Unknown host key for {}:{} (fingerprint: {}), strict mode rejects it",
                        self.host, self.port, fingerprint
                    );
                    return Err(SshError::HostKeyRejected(format!(
                        "unknown host {}:{} (fingerprint {}); add it to known_hosts or disable strict checking",
                        self.host, self.port, fingerprint
                    )));
                }
                info!(
                    "New host {}:{}, adding to known_hosts (fingerprint: {})",
                    self.host, self.port, fingerprint
                );
                if let Err(e) = self
                    .known_hosts
                    .add_host(&self.host, self.port, server_public_key)
                {
                    warn!("Failed to save host key: {}", e);
                }
                Ok(true)
            }
            HostKeyVerification::Changed {
                expected_fingerprint,
                actual_fingerprint,
            } => {
                warn!(
                    "HOST KEY CHANGED for {}:{}! Expected {}, got {}",
                    self.host, self.port, expected_fingerprint, actual_fingerprint
                );
                Err(SshError::HostKeyRejected(format!(
                    "key for {}:{} has changed (expected {}, got {}); remove the old entry from {:?} if the change is legitimate",
                    self.host,
                    self.port,
                    expected_fingerprint,
                    actual_fingerprint,
                    self.known_hosts.path()
                )))
            }
        }
    }
}

/// [`RemoteTransport`] over russh with password authentication
pub struct RusshTransport {
    settings: SshSettings,
    known_hosts: Arc<KnownHostsStore>,
}

impl RusshTransport {
    pub fn new(settings: SshSettings) -> Self {
        let known_hosts = Arc::new(KnownHostsStore::open(settings.known_hosts_file()));
        Self::with_known_hosts(settings, known_hosts)
    }

    pub fn with_known_hosts(settings: SshSettings, known_hosts: Arc<KnownHostsStore>) -> Self {
        Self {
            settings,
            known_hosts,
        }
    }

    async fn connect_inner(
        &self,
        endpoint: &RemoteEndpoint,
        secret: &Secret,
    ) -> Result<RusshConnection, SshError> {
        info!("Connecting to SSH server at {}", endpoint);

        let socket_addr = tokio::net::lookup_host((endpoint.address.as_str(), endpoint.port))
            .await
            .map_err(|e| SshError::ConnectionFailed(format!("Failed to resolve address: {}", e)))?
            .next()
            .ok_or_else(|| SshError::ConnectionFailed("No address found".to_string()))?;

        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: self.settings.keepalive_interval(),
            keepalive_max: self.settings.keepalive_max,
            ..Default::default()
        };

        let handler = ClientHandler::new(
            endpoint.address.clone(),
            endpoint.port,
            self.settings.strict_host_key_checking,
            self.known_hosts.clone(),
        );

        let mut handle = tokio::time::timeout(
            self.settings.connect_timeout(),
            client::connect(Arc::new(ssh_config), socket_addr, handler),
        )
        .await
        .map_err(|_| SshError::Timeout("Connection timed out".to_string()))??;

        debug!("SSH handshake completed with {}", endpoint);

        let authenticated = handle
            .authenticate_password(&endpoint.username, secret.expose())
            .await
            .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?;

        if !authenticated.success() {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "Authentication failed", "en")
                .await;
            return Err(SshError::AuthenticationFailed(
                "Authentication rejected by server".to_string(),
            ));
        }

        info!("SSH authentication successful for {}", endpoint);
        Ok(RusshConnection {
            handle: Arc::new(handle),
            endpoint: endpoint.clone(),
        })
    }
}

#[async_trait]
impl RemoteTransport for RusshTransport {
    async fn connect(
        &self,
        endpoint: &RemoteEndpoint,
        secret: &Secret,
    ) -> Result<Box<dyn TransportConnection>, TransportError> {
        let connection = self.connect_inner(endpoint, secret).await?;
        Ok(Box::new(connection))
    }
}

/// An authenticated russh session
pub struct RusshConnection {
    handle: Arc<Handle<ClientHandler>>,
    endpoint: RemoteEndpoint,
}

impl RusshConnection {
    async fn open_shell_inner(&self, cols: u16, rows: u16) -> Result<RemoteShellBackend, SshError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::ChannelError(format!("Channel open failed: {}", e)))?;

        debug!("Channel opened on {}, requesting PTY", self.endpoint);
        channel
            .request_pty(
                false,
                "xterm-256color",
                u32::from(cols),
                u32::from(rows),
                0,
                0,
                &[],
            )
            .await
            .map_err(|e| SshError::ChannelError(format!("PTY request failed: {}", e)))?;

        channel
            .request_shell(false)
            .await
            .map_err(|e| SshError::ChannelError(format!("Shell request failed: {}", e)))?;

        info!("Interactive shell started on {}", self.endpoint);
        Ok(RemoteShellBackend::start(
            channel,
            self.handle.clone(),
            self.endpoint.to_string(),
        ))
    }
}

#[async_trait]
impl TransportConnection for RusshConnection {
    async fn open_shell(
        &self,
        cols: u16,
        rows: u16,
    ) -> Result<Arc<dyn ShellBackend>, TransportError> {
        let backend = self.open_shell_inner(cols, rows).await?;
        Ok(Arc::new(backend))
    }

    async fn close(&self) {
        debug!("Disconnecting {}", self.endpoint);
        if let Err(e) = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
            .await
        {
            debug!("Disconnect from {} failed: {}", self.endpoint, e);
        }
    }
}
