use std::{io, net::SocketAddr, sync::Arc};

use bytes::BytesMut;
use clipsync_core::{CodecError, MAX_LINE_BYTES, ServiceIdentity, decode_clip};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::watch,
    task::JoinHandle,
};
use tracing::{error, info, warn};

use crate::state::{ServiceEvent, ServiceState};

/// Destination for clips accepted on behalf of the local user. The binary
/// plugs in the system clipboard; tests plug in a recorder.
pub trait ClipboardSink: Send + Sync {
    fn set_text(&self, text: &str) -> Result<(), String>;
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind_address: String,
    pub identity: ServiceIdentity,
    pub max_line_bytes: usize,
}

impl ListenerConfig {
    #[must_use]
    pub fn new(bind_address: impl Into<String>) -> Self {
        Self {
            bind_address: bind_address.into(),
            identity: ServiceIdentity::default(),
            max_line_bytes: MAX_LINE_BYTES,
        }
    }
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("transport authorization missing for {address}: {source}")]
    PermissionDenied { address: String, source: io::Error },
    #[error("failed to bind service listener on {address}: {source}")]
    Bind { address: String, source: io::Error },
}

/// Long-lived inbound side of the service: accepts one connection at a
/// time, reads a single framed message from it, dispatches, closes.
pub struct Listener {
    state: ServiceState,
    clipboard: Arc<dyn ClipboardSink>,
    config: ListenerConfig,
}

impl Listener {
    pub fn new(state: ServiceState, clipboard: Arc<dyn ClipboardSink>, config: ListenerConfig) -> Self {
        Self {
            state,
            clipboard,
            config,
        }
    }

    /// Binds the service socket, marks the session running, and spawns the
    /// accept loop.
    pub async fn start(self) -> Result<ListenerHandle, StartError> {
        let socket = TcpListener::bind(&self.config.bind_address)
            .await
            .map_err(|source| start_error(&self.config.bind_address, source))?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| start_error(&self.config.bind_address, source))?;

        info!(
            %local_addr,
            service = %self.config.identity.name,
            uuid = %self.config.identity.uuid,
            "advertising clip listener"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.state.set_running(true);
        let task = tokio::spawn(accept_loop(
            socket,
            self.state.clone(),
            self.clipboard,
            self.config.max_line_bytes,
            shutdown_rx,
        ));

        Ok(ListenerHandle {
            local_addr,
            shutdown: shutdown_tx,
            task: Some(task),
            state: self.state,
        })
    }
}

fn start_error(address: &str, source: io::Error) -> StartError {
    if source.kind() == io::ErrorKind::PermissionDenied {
        StartError::PermissionDenied {
            address: address.to_owned(),
            source,
        }
    } else {
        StartError::Bind {
            address: address.to_owned(),
            source,
        }
    }
}

pub struct ListenerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    state: ServiceState,
}

impl ListenerHandle {
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signals the accept loop to exit and waits for it. Unblocks a pending
    /// accept. Idempotent: repeated calls are no-ops.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let _ = self.shutdown.send(true);
        if let Err(err) = task.await {
            warn!("accept loop task ended abnormally: {err}");
        }
        self.state.set_running(false);
    }
}

async fn accept_loop(
    socket: TcpListener,
    state: ServiceState,
    clipboard: Arc<dyn ClipboardSink>,
    max_line_bytes: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                info!("clip listener stopping");
                break;
            }
            accepted = socket.accept() => {
                match accepted {
                    Ok((stream, remote)) => {
                        // One message per connection, handled to completion
                        // before the next accept.
                        handle_incoming(stream, remote, &state, clipboard.as_ref(), max_line_bytes)
                            .await;
                    }
                    Err(err) => {
                        // Terminal: the plausible causes (transport disabled,
                        // fd exhaustion) are not self-healing.
                        error!("accept failed, clip listener exiting: {err}");
                        break;
                    }
                }
            }
        }
    }
    state.set_running(false);
}

async fn handle_incoming(
    mut stream: TcpStream,
    remote: SocketAddr,
    state: &ServiceState,
    clipboard: &dyn ClipboardSink,
    max_line_bytes: usize,
) {
    match read_one_line(&mut stream, max_line_bytes).await {
        Ok(Some(line)) => match decode_clip(&line) {
            Ok(message) => {
                let auto_copied = state.auto_accept();
                if auto_copied {
                    if let Err(err) = clipboard.set_text(&message.clip) {
                        warn!(%remote, "clipboard write failed: {err}");
                    }
                }
                state.emit(ServiceEvent::Received {
                    text: message.clip,
                    auto_copied,
                });
            }
            Err(err) => warn!(%remote, "dropping connection: {err}"),
        },
        Ok(None) => warn!(%remote, "connection closed without sending a line"),
        Err(err) => warn!(%remote, "failed reading clip line: {err}"),
    }

    // Single-message protocol: always close, whatever the outcome.
    let _ = stream.shutdown().await;
}

/// Reads up to the first newline, capped at `max_line_bytes`. A remainder
/// buffered at EOF counts as a complete line, matching the counterpart
/// implementations' line reader. `None` means the peer sent nothing.
async fn read_one_line<R: AsyncRead + Unpin>(
    stream: &mut R,
    max_line_bytes: usize,
) -> io::Result<Option<BytesMut>> {
    let mut buffer = BytesMut::with_capacity(1024);
    let mut searched = 0;
    loop {
        if let Some(pos) = buffer[searched..].iter().position(|&b| b == b'\n') {
            buffer.truncate(searched + pos);
            return Ok(Some(buffer));
        }
        searched = buffer.len();
        if searched > max_line_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                CodecError::LineTooLong {
                    got: searched,
                    limit: max_line_bytes,
                },
            ));
        }
        if stream.read_buf(&mut buffer).await? == 0 {
            if buffer.is_empty() {
                return Ok(None);
            }
            return Ok(Some(buffer));
        }
    }
}
