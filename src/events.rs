//! Progress event bus.
//!
//! Transfers emit one-way progress deltas to all listeners. The embedding
//! application routes them on to its own progress plumbing; the core never
//! waits on receivers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Progress event kinds. Wire spellings are preserved verbatim, including
/// the historical "Seperate" variants for non-sync transfers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressKind {
    #[serde(rename = "uploadProgress")]
    UploadProgress,
    #[serde(rename = "uploadProgressSeperate")]
    UploadProgressSeperate,
    #[serde(rename = "downloadProgress")]
    DownloadProgress,
    #[serde(rename = "downloadProgressSeperate")]
    DownloadProgressSeperate,
}

/// One progress delta for a transfer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub kind: ProgressKind,
    pub uuid: String,
    pub bytes: u64,
    pub from: String,
}

/// Broadcast bus for progress events.
///
/// Sending never fails: events emitted with no live subscribers are
/// dropped.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
