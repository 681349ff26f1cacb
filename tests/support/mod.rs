//! Shared test helpers: a reversible mock cipher, a wired-up harness and
//! response-envelope builders for wiremock.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use wiremock::MockServer;

use lockdrive_protocol::api::ApiClient;
use lockdrive_protocol::config::ProtocolConfig;
use lockdrive_protocol::crypto::{buffer_to_hash, MasterKeys, MetadataCrypto};
use lockdrive_protocol::error::{ProtocolError, ProtocolResult};
use lockdrive_protocol::events::EventBus;
use lockdrive_protocol::pause::NoSyncLocations;
use lockdrive_protocol::propagate::MetadataPropagator;
use lockdrive_protocol::store::{ConfigStore, MemoryConfigStore};
use lockdrive_protocol::transfer::TransferEngine;
use lockdrive_protocol::transport::{OnlineFlag, Transport};
use lockdrive_protocol::types::FileMeta;

/// 64 printable characters, like a real bearer token.
pub const API_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

pub const MASTER_OLD: &str = "master-old";
pub const MASTER_CURRENT: &str = "master-current";

// ── Mock cipher ──
//
// Reversible "encryption": `<tag>$<key>$<base64(plaintext)>`. Decryption
// requires the matching key, which makes trial decryption against the
// master key list observable in tests.

const SYM: &str = "sym";
const PUB: &str = "pub";

fn encode(tag: &str, key: &str, plaintext: &str) -> String {
    format!("{tag}${key}${}", STANDARD.encode(plaintext))
}

fn decode(blob: &str, tag: &str, key: &str) -> Option<String> {
    let mut parts = blob.splitn(3, '$');
    if parts.next()? != tag || parts.next()? != key {
        return None;
    }
    let raw = STANDARD.decode(parts.next()?).ok()?;
    String::from_utf8(raw).ok()
}

/// Symmetric mock encryption, for building fixture blobs.
pub fn sym_encrypt(key: &str, plaintext: &str) -> String {
    encode(SYM, key, plaintext)
}

/// Decrypts a recipient-public-key mock blob, for asserting payloads.
pub fn pub_decrypt(public_key: &str, blob: &str) -> Option<String> {
    decode(blob, PUB, public_key)
}

/// Decrypts a symmetric mock blob, for asserting payloads.
pub fn sym_decrypt(key: &str, blob: &str) -> Option<String> {
    decode(blob, SYM, key)
}

pub struct MockCrypto;

impl MetadataCrypto for MockCrypto {
    fn name_hash(&self, lowercase_name: &str) -> String {
        buffer_to_hash(lowercase_name.as_bytes())[..64].to_string()
    }

    fn encrypt_metadata(&self, plaintext: &str, key: &str) -> ProtocolResult<String> {
        Ok(encode(SYM, key, plaintext))
    }

    fn encrypt_metadata_public_key(
        &self,
        plaintext: &str,
        public_key: &str,
    ) -> ProtocolResult<String> {
        Ok(encode(PUB, public_key, plaintext))
    }

    fn decrypt_file_metadata(&self, blob: &str, keys: &MasterKeys) -> ProtocolResult<FileMeta> {
        let plain = trial_decrypt(blob, keys)?;
        serde_json::from_str(&plain).map_err(|err| ProtocolError::Crypto(err.to_string()))
    }

    fn decrypt_folder_name(&self, blob: &str, keys: &MasterKeys) -> ProtocolResult<String> {
        #[derive(serde::Deserialize)]
        struct Name {
            name: String,
        }
        let plain = trial_decrypt(blob, keys)?;
        let parsed: Name =
            serde_json::from_str(&plain).map_err(|err| ProtocolError::Crypto(err.to_string()))?;
        Ok(parsed.name)
    }

    fn decrypt_folder_link_key(&self, blob: &str, keys: &MasterKeys) -> ProtocolResult<String> {
        trial_decrypt(blob, keys)
    }
}

fn trial_decrypt(blob: &str, keys: &MasterKeys) -> ProtocolResult<String> {
    keys.all()
        .iter()
        .find_map(|key| decode(blob, SYM, key))
        .ok_or_else(|| ProtocolError::Crypto("no master key decrypts blob".to_string()))
}

// ── Harness ──

pub struct Harness {
    pub store: Arc<MemoryConfigStore>,
    pub api: Arc<ApiClient>,
    pub propagator: Arc<MetadataPropagator>,
    pub engine: Arc<TransferEngine>,
    pub events: EventBus,
    pub online: OnlineFlag,
    pub logout_count: Arc<AtomicUsize>,
}

/// Full protocol stack against one mock server, with short test retry
/// timeouts and the mock cipher.
pub fn harness(server: &MockServer) -> Harness {
    let config = Arc::new(ProtocolConfig::test(&server.uri()));
    let store = Arc::new(MemoryConfigStore::new());
    store.set_api_key(API_KEY);
    store.set_master_keys(
        MasterKeys::new(vec![MASTER_OLD.to_string(), MASTER_CURRENT.to_string()]).unwrap(),
    );

    let logout_count = Arc::new(AtomicUsize::new(0));
    let logout = {
        let count = logout_count.clone();
        Arc::new(move || {
            count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }) as Arc<dyn Fn() + Send + Sync>
    };

    let online = OnlineFlag::new();
    let transport = Arc::new(
        Transport::new(
            config,
            store.clone() as Arc<dyn ConfigStore>,
            online.clone(),
            logout,
        )
        .unwrap(),
    );
    let api = Arc::new(ApiClient::new(transport.clone()));
    let crypto = Arc::new(MockCrypto);
    let propagator = Arc::new(MetadataPropagator::new(api.clone(), crypto.clone()));
    let events = EventBus::new(4096);
    let engine = Arc::new(TransferEngine::new(
        api.clone(),
        crypto,
        events.clone(),
        propagator.clone(),
        Arc::new(NoSyncLocations),
    ));

    Harness {
        store,
        api,
        propagator,
        engine,
        events,
        online,
        logout_count,
    }
}

// ── Envelope builders ──

pub fn ok_body(data: serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "status": true, "message": "ok", "code": "success", "data": data })
}

pub fn err_body(code: &str, message: &str) -> serde_json::Value {
    serde_json::json!({ "status": false, "message": message, "code": code })
}

/// Requests the server saw for one path.
pub async fn requests_to(server: &MockServer, path: &str) -> Vec<wiremock::Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|request| request.url.path() == path)
        .collect()
}

pub fn body_json(request: &wiremock::Request) -> serde_json::Value {
    serde_json::from_slice(&request.body).unwrap()
}
