//! Remote shell channel backend
//!
//! One task owns the russh channel and multiplexes input commands with
//! incoming channel messages. stdout and stderr (extended data type 1) are
//! merged into a single output stream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use russh::client::{Handle, Msg};
use russh::{Channel, ChannelMsg};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use super::client::ClientHandler;
use crate::backend::{BackendError, BackendKind, OutputDispatcher, ShellBackend};
use crate::events::Subscription;

const COMMAND_QUEUE_DEPTH: usize = 1024;
const CLOSE_ACK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
enum ChannelCommand {
    Data(Vec<u8>),
    Resize(u16, u16),
    Close(oneshot::Sender<()>),
}

pub struct RemoteShellBackend {
    label: String,
    cmd_tx: Mutex<Option<mpsc::Sender<ChannelCommand>>>,
    output: Arc<OutputDispatcher>,
    handle: Arc<Handle<ClientHandler>>,
}

impl RemoteShellBackend {
    /// Take ownership of an interactive channel and start its pump task
    pub fn start(channel: Channel<Msg>, handle: Arc<Handle<ClientHandler>>, label: String) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let output = Arc::new(OutputDispatcher::new());

        tokio::spawn(channel_pump(channel, cmd_rx, output.clone(), label.clone()));

        Self {
            label,
            cmd_tx: Mutex::new(Some(cmd_tx)),
            output,
            handle,
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<ChannelCommand>> {
        self.cmd_tx.lock().as_ref().cloned()
    }
}

async fn channel_pump(
    mut channel: Channel<Msg>,
    mut cmd_rx: mpsc::Receiver<ChannelCommand>,
    output: Arc<OutputDispatcher>,
    label: String,
) {
    debug!("Channel pump started for {}", label);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ChannelCommand::Data(data)) => {
                        if let Err(e) = channel.data(&data[..]).await {
                            error!("Failed to send data to SSH channel {}: {}", label, e);
                            break;
                        }
                    }
                    Some(ChannelCommand::Resize(cols, rows)) => {
                        if let Err(e) = channel
                            .window_change(u32::from(cols), u32::from(rows), 0, 0)
                            .await
                        {
                            // Resize failures leave the channel usable
                            error!("Failed to resize PTY on {}: {}", label, e);
                        } else {
                            debug!("PTY resized to {}x{} on {}", cols, rows, label);
                        }
                    }
                    Some(ChannelCommand::Close(ack)) => {
                        let _ = channel.eof().await;
                        let _ = channel.close().await;
                        let _ = ack.send(());
                        break;
                    }
                    None => break,
                }
            }

            msg = channel.wait() => {
                if handle_channel_msg(msg, &output, &label) == Flow::Stop {
                    break;
                }
            }
        }
    }

    debug!("Channel pump terminated for {}", label);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Route one incoming channel message. stdout and stderr share the output
/// stream; other extended data types are dropped.
fn handle_channel_msg(msg: Option<ChannelMsg>, output: &OutputDispatcher, label: &str) -> Flow {
    match msg {
        Some(ChannelMsg::Data { data }) => {
            if !output.dispatch(Bytes::copy_from_slice(&data)) {
                return Flow::Stop;
            }
        }
        Some(ChannelMsg::ExtendedData { data, ext }) => {
            if ext == 1 && !output.dispatch(Bytes::copy_from_slice(&data)) {
                return Flow::Stop;
            }
        }
        Some(ChannelMsg::Eof) => {
            info!("SSH channel EOF on {}", label);
        }
        Some(ChannelMsg::Close) | None => {
            info!("SSH channel closed on {}", label);
            return Flow::Stop;
        }
        Some(ChannelMsg::ExitStatus { exit_status }) => {
            info!("Remote shell on {} exited with status {}", label, exit_status);
        }
        Some(_) => {}
    }
    Flow::Continue
}

#[async_trait]
impl ShellBackend for RemoteShellBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn write(&self, data: &[u8]) -> Result<(), BackendError> {
        let Some(tx) = self.sender() else {
            return Ok(());
        };
        tx.send(ChannelCommand::Data(data.to_vec()))
            .await
            .map_err(|_| BackendError::Other("SSH channel closed".to_string()))
    }

    async fn resize(&self, cols: u16, rows: u16) -> Result<(), BackendError> {
        let Some(tx) = self.sender() else {
            return Ok(());
        };
        tx.send(ChannelCommand::Resize(cols, rows))
            .await
            .map_err(|_| BackendError::Other("SSH channel closed".to_string()))
    }

    async fn close(&self) {
        if !self.output.close() {
            return;
        }
        info!("Closing SSH shell on {}", self.label);

        let taken = self.cmd_tx.lock().take();
        if let Some(tx) = taken {
            let (ack_tx, ack_rx) = oneshot::channel();
            if tx.try_send(ChannelCommand::Close(ack_tx)).is_ok() {
                let _ = tokio::time::timeout(CLOSE_ACK_TIMEOUT, ack_rx).await;
            }
        }

        if let Err(e) = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
            .await
        {
            debug!("Disconnect from {} failed: {}", self.label, e);
        }
    }

    fn subscribe(&self, on_data: Box<dyn Fn(Bytes) + Send + Sync>) -> Subscription {
        self.output.subscribe(on_data)
    }

    fn is_closed(&self) -> bool {
        self.output.is_closed()
    }
}
