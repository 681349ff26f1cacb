//! Configuration store interface.
//!
//! The embedding application owns a concurrent key-value store; the
//! protocol core reads credentials, pause flags and networking settings
//! through this trait and writes back the quota-exhaustion flags.

use std::sync::RwLock;

use crate::crypto::MasterKeys;
use crate::types::NetworkingSettings;

/// Abstract key-value configuration store with atomic get/set.
pub trait ConfigStore: Send + Sync {
    /// Bearer token, read on every request.
    fn api_key(&self) -> Option<String>;

    /// Ordered master key list; `None` before login.
    fn master_keys(&self) -> Option<MasterKeys>;

    /// Global transfer pause flag.
    fn paused(&self) -> bool;

    /// Download-direction pause flag.
    fn download_paused(&self) -> bool;

    /// Upload-direction pause flag.
    fn upload_paused(&self) -> bool;

    /// Set when the server reported quota exhaustion.
    fn max_storage_reached(&self) -> bool;

    /// User bandwidth limits for sync-originated transfers.
    fn networking_settings(&self) -> NetworkingSettings;

    fn set_paused(&self, value: bool);

    fn set_max_storage_reached(&self, value: bool);
}

/// In-memory [`ConfigStore`] used by tests and single-process embeddings.
#[derive(Default)]
pub struct MemoryConfigStore {
    inner: RwLock<StoreState>,
}

#[derive(Default)]
struct StoreState {
    api_key: Option<String>,
    master_keys: Option<MasterKeys>,
    paused: bool,
    download_paused: bool,
    upload_paused: bool,
    max_storage_reached: bool,
    networking: NetworkingSettings,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_api_key(&self, key: impl Into<String>) {
        self.inner.write().unwrap().api_key = Some(key.into());
    }

    pub fn set_master_keys(&self, keys: MasterKeys) {
        self.inner.write().unwrap().master_keys = Some(keys);
    }

    pub fn set_download_paused(&self, value: bool) {
        self.inner.write().unwrap().download_paused = value;
    }

    pub fn set_upload_paused(&self, value: bool) {
        self.inner.write().unwrap().upload_paused = value;
    }

    pub fn set_networking_settings(&self, settings: NetworkingSettings) {
        self.inner.write().unwrap().networking = settings;
    }
}

impl ConfigStore for MemoryConfigStore {
    fn api_key(&self) -> Option<String> {
        self.inner.read().unwrap().api_key.clone()
    }

    fn master_keys(&self) -> Option<MasterKeys> {
        self.inner.read().unwrap().master_keys.clone()
    }

    fn paused(&self) -> bool {
        self.inner.read().unwrap().paused
    }

    fn download_paused(&self) -> bool {
        self.inner.read().unwrap().download_paused
    }

    fn upload_paused(&self) -> bool {
        self.inner.read().unwrap().upload_paused
    }

    fn max_storage_reached(&self) -> bool {
        self.inner.read().unwrap().max_storage_reached
    }

    fn networking_settings(&self) -> NetworkingSettings {
        self.inner.read().unwrap().networking
    }

    fn set_paused(&self, value: bool) {
        self.inner.write().unwrap().paused = value;
    }

    fn set_max_storage_reached(&self, value: bool) {
        self.inner.write().unwrap().max_storage_reached = value;
    }
}
