//! Chunked transfer engine and mutating item operations.
//!
//! Uploads and downloads run on their own connection pools underneath the
//! pause gate and the per-direction throttle groups, emitting progress
//! deltas per 64 KiB slice. Item mutations (create, rename, move, trash,
//! links) compute their encrypted payloads here and hand successful
//! changes to the metadata propagator.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use rand::distr::Alphanumeric;
use rand::Rng;
use reqwest::StatusCode;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::{ApiClient, DirCreateOutcome};
use crate::crypto::{buffer_to_hash, MetadataCrypto};
use crate::error::{ProtocolError, ProtocolResult};
use crate::events::{EventBus, ProgressEvent, ProgressKind};
use crate::pause::{PauseGate, SyncLocations, TransferSource};
use crate::propagate::MetadataPropagator;
use crate::throttle::{ThrottleGroup, ThrottleHandle, UNLIMITED_RATE};
use crate::types::*;

/// Transfer slice size; one throttle acquisition and one progress event
/// per slice.
const SLICE_SIZE: usize = 64 * 1024;

/// Chunked transfer engine. Create one per process: the throttle groups
/// and the folder-creation gate it owns are meant to be process-global.
pub struct TransferEngine {
    api: Arc<ApiClient>,
    crypto: Arc<dyn MetadataCrypto>,
    events: EventBus,
    pause: PauseGate,
    propagator: Arc<MetadataPropagator>,
    upload_throttle: ThrottleGroup,
    download_throttle: ThrottleGroup,
    /// Serializes `create_folder` across the process so concurrent
    /// producers cannot create duplicate siblings.
    create_folder_gate: tokio::sync::Mutex<()>,
}

impl TransferEngine {
    pub fn new(
        api: Arc<ApiClient>,
        crypto: Arc<dyn MetadataCrypto>,
        events: EventBus,
        propagator: Arc<MetadataPropagator>,
        locations: Arc<dyn SyncLocations>,
    ) -> Self {
        let transport = api.transport();
        let pause = PauseGate::new(
            transport.store().clone(),
            locations,
            transport.config().pause_poll_interval,
        );
        Self {
            api,
            crypto,
            events,
            pause,
            propagator,
            upload_throttle: ThrottleGroup::new(),
            download_throttle: ThrottleGroup::new(),
            create_folder_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn upload_throttle(&self) -> &ThrottleGroup {
        &self.upload_throttle
    }

    pub fn download_throttle(&self) -> &ThrottleGroup {
        &self.download_throttle
    }

    // ── Chunk transfers ──

    /// Uploads one encrypted chunk.
    ///
    /// Hard transport errors fail the call immediately; only non-200
    /// statuses are retried, up to `max_retry_upload` attempts.
    pub async fn upload_chunk(
        &self,
        params: &UploadParams,
        data: Bytes,
        source: TransferSource,
    ) -> ProtocolResult<UploadChunkData> {
        let transport = self.api.transport();
        let store = transport.store();
        let config = transport.config();

        if store.max_storage_reached() {
            return Err(ProtocolError::MaxStorageReached(
                "storage quota already exhausted".to_string(),
            ));
        }
        let api_key = store.api_key().unwrap_or_default();
        let chunk_hash = buffer_to_hash(&data);

        // Deterministic query-parameter map; the Checksum header covers
        // its canonical JSON serialization, chunk hash included.
        let mut query = BTreeMap::new();
        query.insert("uuid".to_string(), params.uuid.clone());
        query.insert("index".to_string(), params.index.to_string());
        query.insert("parent".to_string(), params.parent.clone());
        query.insert("uploadKey".to_string(), params.upload_key.clone());
        query.insert("hash".to_string(), chunk_hash);
        let checksum = buffer_to_hash(&serde_json::to_vec(&query)?);
        let query_string = query
            .iter()
            .map(|(key, value)| {
                format!("{key}={}", utf8_percent_encode(value, NON_ALPHANUMERIC))
            })
            .collect::<Vec<_>>()
            .join("&");

        let kind = if source.is_sync() {
            ProgressKind::UploadProgress
        } else {
            ProgressKind::UploadProgressSeperate
        };

        let mut attempts: u32 = 0;
        loop {
            if attempts >= config.max_retry_upload {
                return Err(ProtocolError::MaxRetries {
                    method: "POST".to_string(),
                    endpoint: "/v3/upload".to_string(),
                    attempts,
                });
            }
            attempts += 1;

            // Pause flags and the user rate are re-read at every attempt
            // start, so mid-transfer changes take effect on the next try.
            self.pause.wait_until_clear(&source).await;
            self.upload_throttle.set_rate(if source.is_sync() {
                kbps_to_rate(store.networking_settings().upload_kbps)
            } else {
                UNLIMITED_RATE
            });

            let _permit = transport.acquire_upload_permit().await;
            let handle = self.upload_throttle.throttle();
            let body = self.progress_body(data.clone(), handle, kind, &params.uuid, &source);

            let sent = transport
                .upload_post(&format!("/v3/upload?{query_string}"))?
                .header("Authorization", format!("Bearer {api_key}"))
                .header("Checksum", &checksum)
                .body(body)
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                // Uploads do not silently retry hard transport errors;
                // intermittent 5xx is covered by the status branch below.
                Err(err) => {
                    return Err(ProtocolError::Transport {
                        context: format!("chunk upload {}/{}", params.uuid, params.index),
                        source: err,
                    });
                }
            };

            if response.status() != StatusCode::OK {
                warn!(
                    uuid = %params.uuid,
                    index = params.index,
                    attempt = attempts,
                    status = %response.status(),
                    "chunk upload rejected, retrying"
                );
                tokio::time::sleep(config.retry_upload_timeout).await;
                continue;
            }

            let raw = response
                .bytes()
                .await
                .map_err(|err| ProtocolError::Transport {
                    context: format!("chunk upload {}/{}", params.uuid, params.index),
                    source: err,
                })?;
            let parsed: ApiResponse = serde_json::from_slice(&raw)?;

            if !parsed.status {
                let message = parsed
                    .message
                    .unwrap_or_else(|| "chunk upload failed".to_string());
                if message.to_lowercase().contains("storage") {
                    warn!(uuid = %params.uuid, "storage quota exhausted, pausing transfers");
                    store.set_paused(true);
                    store.set_max_storage_reached(true);
                    return Err(ProtocolError::MaxStorageReached(message));
                }
                return Err(ProtocolError::Server {
                    message,
                    code: parsed.code,
                });
            }

            let data_value = parsed.data.unwrap_or_else(|| serde_json::json!({}));
            return Ok(serde_json::from_value(data_value)?);
        }
    }

    /// Downloads one encrypted chunk, returning the opaque ciphertext.
    ///
    /// Every failure mode (status, transport, mid-body) is retried up to
    /// `max_retry_download` attempts.
    pub async fn download_chunk(
        &self,
        address: &ChunkAddress,
        source: TransferSource,
    ) -> ProtocolResult<Bytes> {
        let transport = self.api.transport();
        let store = transport.store();
        let config = transport.config();

        let kind = if source.is_sync() {
            ProgressKind::DownloadProgress
        } else {
            ProgressKind::DownloadProgressSeperate
        };
        let path = format!(
            "/{}/{}/{}/{}",
            address.region, address.bucket, address.uuid, address.index
        );

        let mut attempts: u32 = 0;
        loop {
            if attempts >= config.max_retry_download {
                return Err(ProtocolError::MaxRetries {
                    method: "GET".to_string(),
                    endpoint: path,
                    attempts,
                });
            }
            attempts += 1;

            self.pause.wait_until_clear(&source).await;
            self.download_throttle.set_rate(if source.is_sync() {
                kbps_to_rate(store.networking_settings().download_kbps)
            } else {
                UNLIMITED_RATE
            });

            let _permit = transport.acquire_download_permit().await;
            let handle = self.download_throttle.throttle();

            match self
                .download_attempt(&path, &handle, kind, &address.uuid, &source)
                .await
            {
                Ok(bytes) => return Ok(bytes),
                Err(err) => {
                    warn!(
                        path = %path,
                        attempt = attempts,
                        error = %err,
                        "chunk download failed, retrying"
                    );
                    tokio::time::sleep(config.retry_download_timeout).await;
                }
            }
        }
    }

    async fn download_attempt(
        &self,
        path: &str,
        handle: &ThrottleHandle,
        kind: ProgressKind,
        uuid: &str,
        source: &TransferSource,
    ) -> ProtocolResult<Bytes> {
        let response = self.api.transport().download_get(path)?.send().await?;
        if response.status() != StatusCode::OK {
            return Err(ProtocolError::Server {
                message: format!("chunk download returned {}", response.status()),
                code: None,
            });
        }

        let mut buffer = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(slice) = stream.next().await {
            let slice = slice?;
            handle.acquire(slice.len() as u64).await;
            self.events.emit(ProgressEvent {
                kind,
                uuid: uuid.to_string(),
                bytes: slice.len() as u64,
                from: source.label().to_string(),
            });
            buffer.extend_from_slice(&slice);
        }
        Ok(Bytes::from(buffer))
    }

    /// Marks a chunked upload as complete.
    pub async fn mark_upload_done(
        &self,
        done: &UploadDoneRequest,
    ) -> ProtocolResult<UploadDoneData> {
        self.api.upload_done(done).await
    }

    fn progress_body(
        &self,
        data: Bytes,
        handle: ThrottleHandle,
        kind: ProgressKind,
        uuid: &str,
        source: &TransferSource,
    ) -> reqwest::Body {
        let slices: Vec<Bytes> = {
            let mut slices = Vec::with_capacity(data.len() / SLICE_SIZE + 1);
            let mut offset = 0;
            while offset < data.len() {
                let end = (offset + SLICE_SIZE).min(data.len());
                slices.push(data.slice(offset..end));
                offset = end;
            }
            slices
        };

        let events = self.events.clone();
        let uuid = uuid.to_string();
        let from = source.label().to_string();
        let stream = futures_util::stream::iter(slices).then(move |slice| {
            let handle = handle.clone();
            let events = events.clone();
            let uuid = uuid.clone();
            let from = from.clone();
            async move {
                handle.acquire(slice.len() as u64).await;
                events.emit(ProgressEvent {
                    kind,
                    uuid,
                    bytes: slice.len() as u64,
                    from,
                });
                Ok::<Bytes, std::convert::Infallible>(slice)
            }
        });
        reqwest::Body::wrap_stream(stream)
    }

    // ── Item mutations ──

    /// Creates a folder, serialized through the process-wide gate so the
    /// name-hash probe and create cannot interleave with another create.
    ///
    /// Returns the folder's UUID — the requested one, or the existing
    /// sibling's when the server reports a same-name duplicate.
    pub async fn create_folder(
        &self,
        uuid: &str,
        name: &str,
        parent: &str,
    ) -> ProtocolResult<String> {
        let _gate = self.create_folder_gate.lock().await;

        let keys = self
            .api
            .transport()
            .store()
            .master_keys()
            .ok_or(ProtocolError::Config("masterKeys"))?;
        let name_hashed = self.crypto.name_hash(&name.to_lowercase());
        let meta = Metadata::Folder(FolderMeta { name: name.into() });
        let encrypted = self
            .crypto
            .encrypt_metadata(&meta.to_plaintext(), keys.current())?;

        match self
            .api
            .dir_create(uuid, &encrypted, &name_hashed, parent)
            .await?
        {
            DirCreateOutcome::Exists { uuid: existing } => Ok(existing),
            DirCreateOutcome::Created => {
                debug!(uuid, parent, "folder created");
                self.propagator
                    .on_parent_mutation(ItemKind::Folder, parent, uuid, &meta)
                    .await;
                Ok(uuid.to_string())
            }
        }
    }

    /// Renames a file and fans the new metadata out to its recipients.
    pub async fn rename_file(&self, uuid: &str, meta: &FileMeta) -> ProtocolResult<()> {
        let keys = self
            .api
            .transport()
            .store()
            .master_keys()
            .ok_or(ProtocolError::Config("masterKeys"))?;
        let name_hashed = self.crypto.name_hash(&meta.name.to_lowercase());
        // The visible name travels under the file's own content key; the
        // full record under the current master key.
        let name_encrypted = self.crypto.encrypt_metadata(&meta.name, &meta.key)?;
        let metadata = Metadata::File(meta.clone());
        let record_encrypted = self
            .crypto
            .encrypt_metadata(&metadata.to_plaintext(), keys.current())?;

        self.api
            .file_rename(uuid, &name_encrypted, &name_hashed, &record_encrypted)
            .await?;
        self.propagator
            .on_item_rename(ItemKind::File, uuid, &metadata)
            .await;
        Ok(())
    }

    /// Renames a folder and fans the new metadata out to its recipients.
    pub async fn rename_folder(&self, uuid: &str, name: &str) -> ProtocolResult<()> {
        let keys = self
            .api
            .transport()
            .store()
            .master_keys()
            .ok_or(ProtocolError::Config("masterKeys"))?;
        let name_hashed = self.crypto.name_hash(&name.to_lowercase());
        let meta = Metadata::Folder(FolderMeta { name: name.into() });
        let encrypted = self
            .crypto
            .encrypt_metadata(&meta.to_plaintext(), keys.current())?;

        self.api.dir_rename(uuid, &encrypted, &name_hashed).await?;
        self.propagator
            .on_item_rename(ItemKind::Folder, uuid, &meta)
            .await;
        Ok(())
    }

    /// Moves a file into a new parent and propagates to the parent's
    /// recipients.
    pub async fn move_file(
        &self,
        uuid: &str,
        to_parent: &str,
        meta: &FileMeta,
    ) -> ProtocolResult<()> {
        self.api.file_move(uuid, to_parent).await?;
        self.propagator
            .on_parent_mutation(ItemKind::File, to_parent, uuid, &Metadata::File(meta.clone()))
            .await;
        Ok(())
    }

    /// Moves a folder into a new parent and propagates to the parent's
    /// recipients.
    pub async fn move_folder(
        &self,
        uuid: &str,
        to_parent: &str,
        name: &str,
    ) -> ProtocolResult<()> {
        self.api.dir_move(uuid, to_parent).await?;
        self.propagator
            .on_parent_mutation(
                ItemKind::Folder,
                to_parent,
                uuid,
                &Metadata::Folder(FolderMeta { name: name.into() }),
            )
            .await;
        Ok(())
    }

    /// Moves an item to trash. Success on already-absent targets.
    pub async fn trash_item(&self, kind: ItemKind, uuid: &str) -> ProtocolResult<()> {
        match kind {
            ItemKind::Folder => self.api.dir_trash(uuid).await,
            ItemKind::File => self.api.file_trash(uuid).await,
        }
    }

    /// Enables a public link on a file and returns the new link UUID.
    ///
    /// Folder link enable is not implemented; `dir/link/add` via the
    /// propagation path is the only way folders join links today.
    pub async fn enable_public_link(&self, kind: ItemKind, uuid: &str) -> ProtocolResult<String> {
        match kind {
            ItemKind::Folder => Err(ProtocolError::Unimplemented("folder public link enable")),
            ItemKind::File => {
                let link_uuid = Uuid::new_v4().to_string();
                let password_hashed = self.crypto.name_hash("empty");
                let salt = random_salt();
                self.api
                    .file_link_edit(
                        &link_uuid,
                        uuid,
                        "empty",
                        &password_hashed,
                        &salt,
                        "never",
                        "enable",
                    )
                    .await?;
                Ok(link_uuid)
            }
        }
    }

    /// Disables an item's public link. A file with no active link is
    /// treated as already disabled.
    pub async fn disable_public_link(&self, kind: ItemKind, uuid: &str) -> ProtocolResult<()> {
        match kind {
            ItemKind::Folder => self.api.dir_link_remove(uuid).await,
            ItemKind::File => {
                let status = self.api.file_link_status(uuid).await?;
                let link_uuid = match (status.enabled, status.link_uuid) {
                    (true, Some(link_uuid)) => link_uuid,
                    _ => {
                        debug!(uuid, "no active link to disable");
                        return Ok(());
                    }
                };
                let password_hashed = self.crypto.name_hash("empty");
                let salt = random_salt();
                self.api
                    .file_link_edit(
                        &link_uuid,
                        uuid,
                        "empty",
                        &password_hashed,
                        &salt,
                        "never",
                        "disable",
                    )
                    .await
            }
        }
    }
}

/// Converts a Kbps user setting into bytes per second; 0 means unlimited.
fn kbps_to_rate(kbps: u64) -> u64 {
    if kbps == 0 {
        UNLIMITED_RATE
    } else {
        kbps * 1024 / 8
    }
}

/// 32-char alphanumeric salt for link password placeholders.
fn random_salt() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}
