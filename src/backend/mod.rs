//! Shell backends
//!
//! One capability surface for everything that can run an interactive shell:
//! a local process in a pseudo-terminal, or a shell channel on an
//! authenticated SSH transport.
//!
//! The broker never talks to portable-pty or russh directly. It drives the
//! [`PtySpawner`] and [`RemoteTransport`] seams, which hand back a
//! [`ShellBackend`]. Tests plug in fakes at the same seams.
//!
//! Every backend guarantees that after `close()` no data callback fires and
//! `write`/`resize` quietly do nothing.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::credential::Secret;
use crate::events::{Listeners, Subscription};

/// Backend variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Remote,
}

/// Error type for live backend operations
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend error: {0}")]
    Other(String),
}

#[async_trait]
pub trait ShellBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Forward input bytes. A no-op once closed.
    async fn write(&self, data: &[u8]) -> Result<(), BackendError>;

    /// Change the terminal size. A no-op once closed.
    async fn resize(&self, cols: u16, rows: u16) -> Result<(), BackendError>;

    /// Release the underlying process or channel. Idempotent.
    async fn close(&self);

    /// Receive output chunks in production order
    fn subscribe(&self, on_data: Box<dyn Fn(Bytes) + Send + Sync>) -> Subscription;

    fn is_closed(&self) -> bool;
}

// ============================================================================
// Output dispatch shared by backend implementations
// ============================================================================

/// Default output kept for a backend whose first subscriber has not arrived yet
pub const DEFAULT_EARLY_OUTPUT_BYTES: usize = 64 * 1024;

struct DispatchState {
    /// Chunks produced before anyone subscribed, oldest first
    early: VecDeque<Bytes>,
    early_bytes: usize,
    attached: bool,
}

impl DispatchState {
    fn buffer(&mut self, chunk: Bytes, limit: usize) {
        self.early_bytes += chunk.len();
        self.early.push_back(chunk);
        while self.early_bytes > limit {
            match self.early.pop_front() {
                Some(old) => self.early_bytes -= old.len(),
                None => break,
            }
        }
    }

    fn attach(&mut self) -> Vec<Bytes> {
        if self.attached {
            return Vec::new();
        }
        self.attached = true;
        self.early_bytes = 0;
        self.early.drain(..).collect()
    }
}

/// Output side of a backend: closable listener set plus closed flag.
///
/// Output produced before the first subscription is held (bounded, oldest
/// dropped) and replayed to that first subscriber, so a shell's opening
/// prompt survives the gap between spawn and wiring.
pub struct OutputDispatcher {
    listeners: Arc<Listeners<Bytes>>,
    state: Mutex<DispatchState>,
    early_limit: usize,
    closed: AtomicBool,
}

impl OutputDispatcher {
    pub fn new() -> Self {
        Self::with_early_limit(DEFAULT_EARLY_OUTPUT_BYTES)
    }

    pub fn with_early_limit(early_limit: usize) -> Self {
        Self {
            listeners: Arc::new(Listeners::new()),
            state: Mutex::new(DispatchState {
                early: VecDeque::new(),
                early_bytes: 0,
                attached: false,
            }),
            early_limit,
            closed: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self, on_data: Box<dyn Fn(Bytes) + Send + Sync>) -> Subscription {
        self.listeners.add_with_replay(
            Arc::new(move |chunk: &Bytes| on_data(chunk.clone())),
            || self.state.lock().attach(),
        )
    }

    /// Deliver a chunk. Returns `false` once closed.
    pub fn dispatch(&self, chunk: Bytes) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        {
            let mut state = self.state.lock();
            if !state.attached {
                state.buffer(chunk, self.early_limit);
                return true;
            }
        }
        self.listeners.emit(&chunk)
    }

    /// Mark closed. Returns `true` only for the first call.
    pub fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        self.listeners.close();
        if first {
            let mut state = self.state.lock();
            state.early.clear();
            state.early_bytes = 0;
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for OutputDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Local process seam
// ============================================================================

/// Parameters for spawning a local shell
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Shell executable; `None` picks the platform default
    pub shell: Option<PathBuf>,
    pub cols: u16,
    pub rows: u16,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub load_profile: bool,
}

impl Default for SpawnRequest {
    fn default() -> Self {
        Self {
            shell: None,
            cols: 80,
            rows: 24,
            cwd: None,
            env: BTreeMap::new(),
            load_profile: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("Local terminal support is not available in this build")]
    Unsupported,

    #[error("Failed to spawn shell: {0}")]
    Failed(String),
}

#[async_trait]
pub trait PtySpawner: Send + Sync {
    async fn spawn(&self, request: SpawnRequest) -> Result<Arc<dyn ShellBackend>, SpawnError>;
}

/// Spawner used when the `local-terminal` feature is off
pub struct UnsupportedPtySpawner;

#[async_trait]
impl PtySpawner for UnsupportedPtySpawner {
    async fn spawn(&self, _request: SpawnRequest) -> Result<Arc<dyn ShellBackend>, SpawnError> {
        Err(SpawnError::Unsupported)
    }
}

// ============================================================================
// Remote transport seam
// ============================================================================

/// Where and as whom to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub address: String,
    pub port: u16,
    pub username: String,
}

impl std::fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.address, self.port)
    }
}

/// Transport failure, carried verbatim to the caller for display
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Connect and authenticate with a password
    async fn connect(
        &self,
        endpoint: &RemoteEndpoint,
        secret: &Secret,
    ) -> Result<Box<dyn TransportConnection>, TransportError>;
}

#[async_trait]
pub trait TransportConnection: Send + Sync {
    /// Open an interactive shell channel sized to `cols` x `rows`.
    ///
    /// The returned backend owns the transport from then on; closing it tears
    /// the connection down.
    async fn open_shell(&self, cols: u16, rows: u16)
        -> Result<Arc<dyn ShellBackend>, TransportError>;

    /// Tear down the transport (used when no shell took ownership)
    async fn close(&self);
}
