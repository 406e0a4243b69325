use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use clipsync_service::{
    ClipboardSink, Listener, ListenerConfig, RecentPeers, Sender, SenderConfig, ServiceEvent,
    ServiceState, SharingOutcome, TcpConnector,
};
use tokio::io::AsyncBufReadExt;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "clipsync")]
struct ServiceArgs {
    #[arg(long, default_value = "0.0.0.0:9737")]
    bind_address: String,

    /// Peer socket address to broadcast to; repeatable.
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Surface received clips as notifications instead of writing them to
    /// the clipboard.
    #[arg(long, default_value_t = false)]
    notify_only: bool,

    #[arg(long, default_value_t = 1000)]
    settle_delay_ms: u64,

    #[arg(long, default_value = "recent_peers.json")]
    recent_peers_file: PathBuf,
}

struct SystemClipboard;

impl ClipboardSink for SystemClipboard {
    fn set_text(&self, text: &str) -> Result<(), String> {
        arboard::Clipboard::new()
            .and_then(|mut clipboard| clipboard.set_text(text.to_owned()))
            .map_err(|err| err.to_string())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = ServiceArgs::parse();
    let (state, mut events_rx) = ServiceState::new();
    state.set_auto_accept(!args.notify_only);
    for peer in &args.peers {
        state.peers().register(peer.clone());
    }

    let mut recent = RecentPeers::load(&args.recent_peers_file);
    if !recent.all().is_empty() {
        info!("recently used peers: {}", recent.all().join(", "));
    }

    let listener = Listener::new(
        state.clone(),
        Arc::new(SystemClipboard),
        ListenerConfig::new(&args.bind_address),
    );
    let mut handle = match listener.start().await {
        Ok(handle) => handle,
        Err(err) => {
            error!("{err}");
            std::process::exit(1);
        }
    };
    info!("listening on {}", handle.local_addr());

    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                ServiceEvent::Received {
                    text,
                    auto_copied: true,
                } => info!("received clip ({} chars), copied to clipboard", text.chars().count()),
                ServiceEvent::Received {
                    text,
                    auto_copied: false,
                } => info!("received clip: {text}"),
                ServiceEvent::RunningChanged(running) => info!("service running: {running}"),
            }
        }
    });

    let sender = Sender::with_config(
        state.clone(),
        Arc::new(TcpConnector),
        SenderConfig {
            settle_delay: Duration::from_millis(args.settle_delay_ms),
            ..SenderConfig::default()
        },
    );

    // Stand-in for the UI: each stdin line is broadcast to the selected
    // peers.
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let text = line.trim_end_matches('\r');
                if text.is_empty() {
                    continue;
                }
                let report = sender.share_clipboard(text).await;
                for peer in report.succeeded() {
                    if let Err(err) = recent.touch(peer.clone()) {
                        warn!("could not persist recent peers: {err}");
                    }
                }
                match report.outcome() {
                    SharingOutcome::Success => {
                        info!("clip shared with {} peer(s)", report.per_peer().len());
                    }
                    SharingOutcome::NoPeersSelected => warn!("no peers selected"),
                    SharingOutcome::PermissionDenied => {
                        warn!("sharing failed: transport authorization missing");
                    }
                    SharingOutcome::TransportError => warn!("sharing failed: transport error"),
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!("stdin read failed: {err}");
                break;
            }
        }
    }

    handle.stop().await;
    state.clear();
}
