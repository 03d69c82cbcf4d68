//! In-process fakes for the broker's transport and process seams
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use keystone_lib::backend::{
    BackendError, BackendKind, OutputDispatcher, PtySpawner, RemoteEndpoint, RemoteTransport,
    ShellBackend, SpawnError, SpawnRequest, TransportConnection, TransportError,
};
use keystone_lib::config::{HostConfig, MemoryHostStore};
use keystone_lib::credential::Secret;
use keystone_lib::events::Subscription;

// ============================================================================
// Backend
// ============================================================================

/// Shell stand-in that echoes every write back as output
pub struct FakeBackend {
    kind: BackendKind,
    output: OutputDispatcher,
    pub writes: Mutex<Vec<u8>>,
    pub resizes: Mutex<Vec<(u16, u16)>>,
    pub closes: AtomicUsize,
}

impl FakeBackend {
    pub fn new(kind: BackendKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            output: OutputDispatcher::new(),
            writes: Mutex::new(Vec::new()),
            resizes: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        })
    }

    /// Produce output as if the shell printed it
    pub fn emit(&self, data: &str) -> bool {
        self.output.dispatch(Bytes::copy_from_slice(data.as_bytes()))
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShellBackend for FakeBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn write(&self, data: &[u8]) -> Result<(), BackendError> {
        if self.output.is_closed() {
            return Ok(());
        }
        self.writes.lock().extend_from_slice(data);
        self.output.dispatch(Bytes::copy_from_slice(data));
        Ok(())
    }

    async fn resize(&self, cols: u16, rows: u16) -> Result<(), BackendError> {
        if !self.output.is_closed() {
            self.resizes.lock().push((cols, rows));
        }
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.output.close();
    }

    fn subscribe(&self, on_data: Box<dyn Fn(Bytes) + Send + Sync>) -> Subscription {
        self.output.subscribe(on_data)
    }

    fn is_closed(&self) -> bool {
        self.output.is_closed()
    }
}

// ============================================================================
// Local spawner
// ============================================================================

#[derive(Default)]
pub struct FakeSpawner {
    pub fail: Option<String>,
    /// Initial output each spawned shell prints
    pub banner: Option<String>,
    pub spawned: Mutex<Vec<Arc<FakeBackend>>>,
    pub requests: Mutex<Vec<SpawnRequest>>,
}

impl FakeSpawner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            fail: Some(message.to_string()),
            ..Self::default()
        })
    }

    pub fn with_banner(banner: &str) -> Arc<Self> {
        Arc::new(Self {
            banner: Some(banner.to_string()),
            ..Self::default()
        })
    }
}

#[async_trait]
impl PtySpawner for FakeSpawner {
    async fn spawn(&self, request: SpawnRequest) -> Result<Arc<dyn ShellBackend>, SpawnError> {
        self.requests.lock().push(request);
        if let Some(message) = &self.fail {
            return Err(SpawnError::Failed(message.clone()));
        }
        let backend = FakeBackend::new(BackendKind::Local);
        if let Some(banner) = &self.banner {
            backend.emit(banner);
        }
        self.spawned.lock().push(backend.clone());
        Ok(backend)
    }
}

// ============================================================================
// Remote transport
// ============================================================================

#[derive(Default)]
pub struct TransportLog {
    pub connects: Mutex<Vec<(RemoteEndpoint, String)>>,
    pub connection_closes: AtomicUsize,
    pub shells: Mutex<Vec<Arc<FakeBackend>>>,
}

impl TransportLog {
    pub fn connect_count(&self) -> usize {
        self.connects.lock().len()
    }

    pub fn last_secret(&self) -> Option<String> {
        self.connects.lock().last().map(|(_, s)| s.clone())
    }
}

pub struct FakeTransport {
    /// When set, only this password authenticates
    pub expected_password: Option<String>,
    pub connect_error: Option<String>,
    pub shell_error: Option<String>,
    /// Connect blocks until notified
    pub gate: Option<Arc<Notify>>,
    pub log: Arc<TransportLog>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            expected_password: None,
            connect_error: None,
            shell_error: None,
            gate: None,
            log: Arc::new(TransportLog::default()),
        }
    }

    pub fn expecting(password: &str) -> Self {
        Self {
            expected_password: Some(password.to_string()),
            ..Self::new()
        }
    }
}

#[async_trait]
impl RemoteTransport for FakeTransport {
    async fn connect(
        &self,
        endpoint: &RemoteEndpoint,
        secret: &Secret,
    ) -> Result<Box<dyn TransportConnection>, TransportError> {
        self.log
            .connects
            .lock()
            .push((endpoint.clone(), secret.expose().to_string()));

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(message) = &self.connect_error {
            return Err(TransportError::new(message.clone()));
        }
        if let Some(expected) = &self.expected_password {
            if secret.expose() != expected {
                return Err(TransportError::new("Authentication failed: Authentication rejected by server"));
            }
        }
        Ok(Box::new(FakeConnection {
            shell_error: self.shell_error.clone(),
            log: self.log.clone(),
        }))
    }
}

pub struct FakeConnection {
    shell_error: Option<String>,
    log: Arc<TransportLog>,
}

#[async_trait]
impl TransportConnection for FakeConnection {
    async fn open_shell(
        &self,
        _cols: u16,
        _rows: u16,
    ) -> Result<Arc<dyn ShellBackend>, TransportError> {
        if let Some(message) = &self.shell_error {
            return Err(TransportError::new(message.clone()));
        }
        let backend = FakeBackend::new(BackendKind::Remote);
        self.log.shells.lock().push(backend.clone());
        Ok(backend)
    }

    async fn close(&self) {
        self.log.connection_closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn host(id: &str, password: Option<&str>) -> HostConfig {
    let now = Utc::now();
    HostConfig {
        id: id.to_string(),
        name: id.to_string(),
        address: format!("{}.example.net", id),
        port: 22,
        username: "deploy".to_string(),
        password: password.map(str::to_string),
        created_at: now,
        updated_at: now,
    }
}

pub fn hosts(list: Vec<HostConfig>) -> Arc<MemoryHostStore> {
    Arc::new(MemoryHostStore::from_hosts(list))
}

/// Collect a session's output into a shared buffer
pub fn capture() -> (Arc<Mutex<Vec<u8>>>, impl Fn(Bytes) + Send + Sync + 'static) {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let sink = buf.clone();
    (buf, move |chunk: Bytes| sink.lock().extend_from_slice(&chunk))
}

/// Wait until `rx` yields output containing `needle`
pub async fn recv_until(rx: &mut mpsc::UnboundedReceiver<Bytes>, needle: &str, limit: Duration) -> String {
    let mut seen = Vec::new();
    let _ = tokio::time::timeout(limit, async {
        while let Some(chunk) = rx.recv().await {
            seen.extend_from_slice(&chunk);
            if String::from_utf8_lossy(&seen).contains(needle) {
                break;
            }
        }
    })
    .await;
    String::from_utf8_lossy(&seen).into_owned()
}
