use std::{
    collections::BTreeSet,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use clipsync_core::PeerAddress;
use tokio::sync::mpsc;

/// Events surfaced to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// A clip arrived. `auto_copied` tells whether it was already written to
    /// the clipboard or should be surfaced as a notification instead.
    Received { text: String, auto_copied: bool },
    RunningChanged(bool),
}

/// The set of peer addresses currently selected to receive broadcasts.
/// Membership is a toggle; readers always get a whole-set snapshot, never a
/// live view.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    inner: Arc<RwLock<BTreeSet<PeerAddress>>>,
}

impl PeerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the address was not already registered.
    pub fn register(&self, address: impl Into<PeerAddress>) -> bool {
        self.write_set(|peers| peers.insert(address.into()))
    }

    /// Returns true when the address was present.
    pub fn deregister(&self, address: &str) -> bool {
        self.write_set(|peers| peers.remove(address))
    }

    /// Snapshot of the current selection, in iteration order.
    #[must_use]
    pub fn current(&self) -> BTreeSet<PeerAddress> {
        match self.inner.read() {
            Ok(peers) => peers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self.inner.read() {
            Ok(peers) => peers.is_empty(),
            Err(poisoned) => poisoned.into_inner().is_empty(),
        }
    }

    pub fn clear(&self) {
        self.write_set(|peers| peers.clear());
    }

    fn write_set<T>(&self, mutate: impl FnOnce(&mut BTreeSet<PeerAddress>) -> T) -> T {
        match self.inner.write() {
            Ok(mut peers) => mutate(&mut peers),
            Err(poisoned) => mutate(&mut poisoned.into_inner()),
        }
    }
}

/// Per-instance session context: the peer registry, the running and
/// auto-accept flags, and the event stream. Owned by the composition root
/// and handed to the listener and sender by clone.
#[derive(Debug, Clone)]
pub struct ServiceState {
    peers: PeerRegistry,
    running: Arc<AtomicBool>,
    auto_accept: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<ServiceEvent>,
}

impl ServiceState {
    /// Creates the state context plus the event receiver consumed by the
    /// presentation layer.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServiceEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let state = Self {
            peers: PeerRegistry::new(),
            running: Arc::new(AtomicBool::new(false)),
            auto_accept: Arc::new(AtomicBool::new(true)),
            events,
        };
        (state, events_rx)
    }

    #[must_use]
    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        if self.running.swap(running, Ordering::SeqCst) != running {
            self.emit(ServiceEvent::RunningChanged(running));
        }
    }

    #[must_use]
    pub fn auto_accept(&self) -> bool {
        self.auto_accept.load(Ordering::SeqCst)
    }

    pub fn set_auto_accept(&self, enabled: bool) {
        self.auto_accept.store(enabled, Ordering::SeqCst);
    }

    /// Teardown: marks the session stopped and forgets the peer selection.
    /// Not called on ordinary peer de-selection.
    pub fn clear(&self) {
        self.set_running(false);
        self.peers.clear();
    }

    pub(crate) fn emit(&self, event: ServiceEvent) {
        // The receiver may already be gone during shutdown.
        let _ = self.events.send(event);
    }
}
