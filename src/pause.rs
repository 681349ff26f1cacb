//! Cooperative transfer pause gate.
//!
//! Before each transfer attempt the engine blocks here until no
//! applicable pause flag is set. The gate polls rather than subscribing:
//! flag writers (UI, quota handling, sync scheduler) need not know about
//! waiters.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::store::ConfigStore;

/// Where a transfer originated; determines which pause flags apply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferSource {
    /// Local sync engine, optionally tied to a sync location.
    Sync { location: Option<String> },
    /// Standalone download (outside the sync engine).
    Download,
    /// Standalone upload.
    Upload,
    /// Anything else.
    Other,
}

impl TransferSource {
    /// Tag carried in progress events.
    pub fn label(&self) -> &'static str {
        match self {
            TransferSource::Sync { .. } => "sync",
            TransferSource::Download => "download",
            TransferSource::Upload => "upload",
            TransferSource::Other => "other",
        }
    }

    /// True when the transfer originates from the sync engine.
    pub fn is_sync(&self) -> bool {
        matches!(self, TransferSource::Sync { .. })
    }
}

/// Collaborator answering per-location pause queries for sync transfers.
pub trait SyncLocations: Send + Sync {
    fn is_location_paused(&self, location_uuid: &str) -> bool;
}

/// Default collaborator for embeddings without a sync engine.
pub struct NoSyncLocations;

impl SyncLocations for NoSyncLocations {
    fn is_location_paused(&self, _location_uuid: &str) -> bool {
        false
    }
}

/// Polling wait loop over the pause flags.
pub struct PauseGate {
    store: Arc<dyn ConfigStore>,
    locations: Arc<dyn SyncLocations>,
    poll_interval: Duration,
}

impl PauseGate {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        locations: Arc<dyn SyncLocations>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            locations,
            poll_interval,
        }
    }

    /// Whether any flag applicable to `source` is currently set.
    pub fn is_blocked(&self, source: &TransferSource) -> bool {
        match source {
            TransferSource::Sync {
                location: Some(uuid),
            } => self.store.paused() || self.locations.is_location_paused(uuid),
            TransferSource::Sync { location: None } => self.store.paused(),
            TransferSource::Download => self.store.download_paused(),
            TransferSource::Upload => self.store.upload_paused(),
            TransferSource::Other => self.store.paused(),
        }
    }

    /// Blocks until no applicable pause flag is set.
    pub async fn wait_until_clear(&self, source: &TransferSource) {
        let mut logged = false;
        while self.is_blocked(source) {
            if !logged {
                debug!(source = source.label(), "transfer paused, waiting");
                logged = true;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
