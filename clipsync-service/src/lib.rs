pub mod listener;
pub mod recent;
pub mod sender;
pub mod state;

pub use listener::{ClipboardSink, Listener, ListenerConfig, ListenerHandle, StartError};
pub use recent::{RECENT_PEERS_CAPACITY, RecentPeers};
pub use sender::{
    Connector, PeerStream, SendError, Sender, SenderConfig, ShareReport, SharingOutcome,
    TcpConnector,
};
pub use state::{PeerRegistry, ServiceEvent, ServiceState};
