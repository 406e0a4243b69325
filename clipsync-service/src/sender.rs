use std::{
    io,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use clipsync_core::{ClipMessage, PeerAddress, encode_clip};
use thiserror::Error;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time::{sleep, timeout},
};
use tracing::{debug, warn};

use crate::state::ServiceState;

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound stream to one peer's service record.
pub trait PeerStream: AsyncWrite + Send + Unpin {}

impl<T: AsyncWrite + Send + Unpin> PeerStream for T {}

/// Transport seam: opens one stream per message to a peer address.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, peer: &str) -> io::Result<Box<dyn PeerStream>>;
}

/// Production connector. Peer addresses are socket addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, peer: &str) -> io::Result<Box<dyn PeerStream>> {
        let stream = TcpStream::connect(peer).await?;
        Ok(Box::new(stream))
    }
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("transport authorization missing: {0}")]
    PermissionDenied(#[source] io::Error),
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Aggregate result of one multi-peer broadcast, collapsed from the
/// per-peer report with the last peer deciding on mixed results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharingOutcome {
    Success,
    NoPeersSelected,
    PermissionDenied,
    TransportError,
}

/// Per-peer accounting for one broadcast, in the order peers were
/// contacted.
#[derive(Debug)]
pub struct ShareReport {
    per_peer: Vec<(PeerAddress, Result<(), SendError>)>,
}

impl ShareReport {
    #[must_use]
    pub fn per_peer(&self) -> &[(PeerAddress, Result<(), SendError>)] {
        &self.per_peer
    }

    /// Peers that received the clip.
    pub fn succeeded(&self) -> impl Iterator<Item = &PeerAddress> {
        self.per_peer
            .iter()
            .filter_map(|(peer, result)| result.is_ok().then_some(peer))
    }

    /// The single-value contract: the last peer contacted decides the
    /// aggregate, so a caller sending to several peers sees only the final
    /// contribution.
    #[must_use]
    pub fn outcome(&self) -> SharingOutcome {
        match self.per_peer.last() {
            None => SharingOutcome::NoPeersSelected,
            Some((_, Ok(()))) => SharingOutcome::Success,
            Some((_, Err(SendError::PermissionDenied(_)))) => SharingOutcome::PermissionDenied,
            Some((_, Err(SendError::Transport(_)))) => SharingOutcome::TransportError,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Pause between writing the frame and closing the socket, so the
    /// remote's blocking line read finishes before teardown.
    pub settle_delay: Duration,
    /// Bound on each peer's connect attempt so one unresponsive peer cannot
    /// stall the whole batch.
    pub connect_timeout: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Fan-out side of the service: pushes one framed message to every selected
/// peer, serially.
pub struct Sender {
    state: ServiceState,
    connector: Arc<dyn Connector>,
    config: SenderConfig,
}

impl Sender {
    pub fn new(state: ServiceState, connector: Arc<dyn Connector>) -> Self {
        Self::with_config(state, connector, SenderConfig::default())
    }

    pub fn with_config(
        state: ServiceState,
        connector: Arc<dyn Connector>,
        config: SenderConfig,
    ) -> Self {
        Self {
            state,
            connector,
            config,
        }
    }

    /// Broadcasts `text` to the current peer selection, one full
    /// connect-write-close cycle at a time, in registry order. One peer's
    /// failure never aborts the rest.
    pub async fn share_clipboard(&self, text: &str) -> ShareReport {
        let peers = self.state.peers().current();
        if peers.is_empty() {
            debug!("no peers selected, nothing sent");
            return ShareReport {
                per_peer: Vec::new(),
            };
        }

        let message = ClipMessage::new(text, unix_millis());
        let frame = match encode_clip(&message) {
            Ok(frame) => frame,
            Err(err) => {
                let reason = err.to_string();
                warn!("failed to encode clip message: {reason}");
                return ShareReport {
                    per_peer: peers
                        .into_iter()
                        .map(|peer| (peer, Err(SendError::Transport(reason.clone()))))
                        .collect(),
                };
            }
        };

        let mut per_peer = Vec::with_capacity(peers.len());
        for peer in peers {
            let result = self.send_to_peer(&peer, &frame).await;
            match &result {
                Ok(()) => debug!(%peer, "clip delivered"),
                Err(err) => warn!(%peer, "sending clip failed: {err}"),
            }
            per_peer.push((peer, result));
        }
        ShareReport { per_peer }
    }

    async fn send_to_peer(&self, peer: &str, frame: &[u8]) -> Result<(), SendError> {
        let connected = timeout(self.config.connect_timeout, self.connector.connect(peer))
            .await
            .map_err(|_| SendError::Transport(format!("connect to {peer} timed out")))?;
        let mut stream = connected.map_err(classify_io)?;

        stream.write_all(frame).await.map_err(classify_io)?;

        // The remote reads exactly one line and never acks; give its
        // blocking read time to finish before the socket goes away.
        sleep(self.config.settle_delay).await;

        stream.flush().await.map_err(classify_io)?;
        stream.shutdown().await.map_err(classify_io)?;
        Ok(())
    }
}

fn classify_io(err: io::Error) -> SendError {
    if err.kind() == io::ErrorKind::PermissionDenied {
        SendError::PermissionDenied(err)
    } else {
        SendError::Transport(err.to_string())
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
