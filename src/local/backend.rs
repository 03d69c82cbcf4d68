//! Local process backend
//!
//! Runs a shell in a PTY with two pumps:
//! - read pump (blocking thread): PTY output → [`OutputDispatcher`]
//! - write pump (blocking thread): input queue → PTY
//!
//! Closing flips the dispatcher first, so no chunk is delivered after
//! `close()` returns, then kills the shell's process group.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::pty::{PtyConfig, PtyError, PtyHandle, PtyParts};
use super::shell::resolve_shell;
use crate::backend::{
    BackendError, BackendKind, OutputDispatcher, PtySpawner, ShellBackend, SpawnError,
    SpawnRequest,
};
use crate::events::Subscription;

const READ_BUFFER_SIZE: usize = 8192;
const INPUT_QUEUE_DEPTH: usize = 256;

pub struct LocalShellBackend {
    pty: Arc<PtyHandle>,
    input_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    output: Arc<OutputDispatcher>,
}

impl LocalShellBackend {
    /// Wire pumps around a spawned PTY. Must run inside a Tokio runtime.
    pub fn from_parts(parts: PtyParts) -> Arc<Self> {
        let PtyParts {
            handle,
            reader,
            writer,
        } = parts;

        let pty = Arc::new(handle);
        let output = Arc::new(OutputDispatcher::new());
        let (input_tx, input_rx) = mpsc::channel::<Vec<u8>>(INPUT_QUEUE_DEPTH);

        let pid = pty.pid();
        tokio::task::spawn_blocking(move || write_pump(writer, input_rx, pid));
        let pump_output = output.clone();
        tokio::task::spawn_blocking(move || read_pump(reader, pump_output, pid));

        Arc::new(Self {
            pty,
            input_tx: Mutex::new(Some(input_tx)),
            output,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pty.pid()
    }

    /// Whether the shell process is still running
    pub fn is_alive(&self) -> bool {
        self.pty.is_alive()
    }
}

fn write_pump(mut writer: Box<dyn Write + Send>, mut input_rx: mpsc::Receiver<Vec<u8>>, pid: Option<u32>) {
    while let Some(data) = input_rx.blocking_recv() {
        if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
            error!("Failed to write to PTY (pid {:?}): {}", pid, e);
            break;
        }
    }
    debug!("Write pump terminated (pid {:?})", pid);
}

fn read_pump(mut reader: Box<dyn Read + Send>, output: Arc<OutputDispatcher>, pid: Option<u32>) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => {
                debug!("Read pump: PTY EOF (pid {:?})", pid);
                break;
            }
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // EIO is the normal way a Linux PTY reports the child hung up
                debug!("Read pump ended (pid {:?}): {}", pid, e);
                break;
            }
        };

        pending.extend_from_slice(&buf[..n]);
        let safe_end = utf8_safe_boundary(&pending);
        if safe_end == 0 {
            continue;
        }
        let rest = pending.split_off(safe_end);
        let chunk = Bytes::from(std::mem::replace(&mut pending, rest));
        if !output.dispatch(chunk) {
            debug!("Read pump: backend closed (pid {:?})", pid);
            return;
        }
    }

    if !pending.is_empty() {
        output.dispatch(Bytes::from(pending));
    }
    info!("Local shell output ended (pid {:?})", pid);
}

/// Length of the longest prefix that does not end inside a multi-byte UTF-8
/// sequence. Invalid bytes are treated as complete.
fn utf8_safe_boundary(buf: &[u8]) -> usize {
    let len = buf.len();
    // Walk back over at most 3 continuation bytes to the last lead byte
    let mut i = len;
    while i > 0 && len - i < 4 {
        let byte = buf[i - 1];
        if byte & 0x80 == 0 {
            return len;
        }
        if byte & 0xC0 == 0x80 {
            i -= 1;
            continue;
        }
        let needed = match byte {
            b if b & 0xE0 == 0xC0 => 2,
            b if b & 0xF0 == 0xE0 => 3,
            b if b & 0xF8 == 0xF0 => 4,
            _ => return len,
        };
        let start = i - 1;
        return if len - start >= needed { len } else { start };
    }
    len
}

#[async_trait]
impl ShellBackend for LocalShellBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn write(&self, data: &[u8]) -> Result<(), BackendError> {
        let sender = self.input_tx.lock().clone();
        let Some(tx) = sender else {
            return Ok(());
        };
        tx.send(data.to_vec())
            .await
            .map_err(|_| BackendError::Other("shell input closed".to_string()))
    }

    async fn resize(&self, cols: u16, rows: u16) -> Result<(), BackendError> {
        if self.output.is_closed() {
            return Ok(());
        }
        self.pty
            .resize(cols, rows)
            .map_err(|e| BackendError::Other(e.to_string()))
    }

    async fn close(&self) {
        if !self.output.close() {
            return;
        }
        self.input_tx.lock().take();

        info!("Closing local shell (pid {:?})", self.pty.pid());
        let pty = self.pty.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || pty.kill_process_group()).await {
            warn!("PTY kill task failed: {}", e);
        }
    }

    fn subscribe(&self, on_data: Box<dyn Fn(Bytes) + Send + Sync>) -> Subscription {
        self.output.subscribe(on_data)
    }

    fn is_closed(&self) -> bool {
        self.output.is_closed()
    }
}

/// [`PtySpawner`] backed by the platform's native PTY system
#[derive(Debug, Default, Clone)]
pub struct NativePtySpawner;

impl NativePtySpawner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PtySpawner for NativePtySpawner {
    async fn spawn(&self, request: SpawnRequest) -> Result<Arc<dyn ShellBackend>, SpawnError> {
        let config = PtyConfig {
            cols: request.cols,
            rows: request.rows,
            shell: resolve_shell(request.shell.as_deref()),
            cwd: request.cwd,
            env: request.env,
            load_profile: request.load_profile,
        };

        let parts = tokio::task::spawn_blocking(move || PtyHandle::spawn(config))
            .await
            .map_err(|e| SpawnError::Failed(format!("spawn task failed: {}", e)))?
            .map_err(|e: PtyError| SpawnError::Failed(e.to_string()))?;

        let backend: Arc<dyn ShellBackend> = LocalShellBackend::from_parts(parts);
        Ok(backend)
    }
}
