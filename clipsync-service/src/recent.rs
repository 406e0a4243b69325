use std::{
    collections::VecDeque,
    fs, io,
    path::PathBuf,
};

use clipsync_core::PeerAddress;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const RECENT_PEERS_CAPACITY: usize = 4;

/// Most-recently-used peer addresses, newest last, at most four entries,
/// persisted across restarts. Presentation-level collaborator state; the
/// composition root marks peers recent after a successful share.
#[derive(Debug)]
pub struct RecentPeers {
    entries: VecDeque<PeerAddress>,
    path: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SavedRecentPeers {
    recent: Vec<PeerAddress>,
}

impl RecentPeers {
    /// Loads the saved list. A missing file is an empty list; an unreadable
    /// or corrupt one is logged and treated as empty.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut entries: VecDeque<PeerAddress> = match fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<SavedRecentPeers>(&data) {
                Ok(saved) => saved.recent.into(),
                Err(err) => {
                    warn!("ignoring corrupt recent peers file {}: {err}", path.display());
                    VecDeque::new()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => VecDeque::new(),
            Err(err) => {
                warn!("could not read recent peers file {}: {err}", path.display());
                VecDeque::new()
            }
        };
        while entries.len() > RECENT_PEERS_CAPACITY {
            entries.pop_front();
        }
        Self { entries, path }
    }

    /// Marks an address as most recently used and persists the list. An
    /// address already present moves to the newest slot; the oldest entry
    /// is evicted past capacity.
    pub fn touch(&mut self, address: impl Into<PeerAddress>) -> io::Result<()> {
        let address = address.into();
        self.entries.retain(|existing| existing != &address);
        self.entries.push_back(address);
        while self.entries.len() > RECENT_PEERS_CAPACITY {
            self.entries.pop_front();
        }
        self.save()
    }

    /// Oldest to newest.
    #[must_use]
    pub fn all(&self) -> Vec<PeerAddress> {
        self.entries.iter().cloned().collect()
    }

    fn save(&self) -> io::Result<()> {
        let saved = SavedRecentPeers { recent: self.all() };
        let payload = serde_json::to_string_pretty(&saved).map_err(io::Error::other)?;
        // Write-then-rename so a crash never leaves a half-written list.
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, payload)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
