//! Event bus for catalog notifications

use tokio::sync::broadcast;

use crate::sync::Provenance;

/// Things a consumer may want to surface (connectivity notices, progress)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogEvent {
    /// A page reached the paged list
    PageLoaded {
        page: u32,
        count: usize,
        provenance: Provenance,
    },

    /// A fetch ran while the gate reported no connectivity.
    /// Advisory only; the fetch still happened.
    ConnectivityAdvisory,

    /// The reachability signal flipped
    ConnectivityChanged { reachable: bool },

    FavoriteToggled { id: String, is_favorite: bool },

    /// Paged list cleared, reload from page 1 started
    Refreshed { generation: u64 },

    /// A load finished after a newer refresh and was dropped
    LoadSuperseded { page: u32 },

    Disposed,
}

/// Broadcast of catalog events
pub struct EventBus {
    sender: broadcast::Sender<CatalogEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: CatalogEvent) {
        // Ignore send errors (no receivers)
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
