//! Client-side remote storage protocol core for the Lockdrive encrypted
//! cloud drive.
//!
//! Mediates between a local sync engine and the remote object storage:
//! - Checksummed, authenticated API requests with bounded retry,
//!   offline awareness and session-invalidation detection
//! - Chunked uploads/downloads under process-wide rate governors with
//!   cooperative pause and progress reporting
//! - Metadata fan-out to share recipients and public links on every
//!   mutating operation, with best-effort semantics
//!
//! The filesystem sync engine, configuration persistence and the
//! cryptographic primitives are external collaborators injected through
//! the [`store::ConfigStore`], [`pause::SyncLocations`] and
//! [`crypto::MetadataCrypto`] traits.

pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod pause;
pub mod propagate;
pub mod store;
pub mod throttle;
pub mod transfer;
pub mod transport;
pub mod types;

pub use api::{ApiClient, DirCreateOutcome};
pub use config::ProtocolConfig;
pub use error::{ProtocolError, ProtocolResult};
pub use events::{EventBus, ProgressEvent, ProgressKind};
pub use pause::{PauseGate, TransferSource};
pub use propagate::MetadataPropagator;
pub use store::{ConfigStore, MemoryConfigStore};
pub use throttle::ThrottleGroup;
pub use transfer::TransferEngine;
pub use transport::{OnlineFlag, Transport};
pub use types::*;
