//! Typed wrappers for the storage API endpoints.
//!
//! One method per endpoint over [`Transport::request`], so every call
//! inherits checksumming, retry and session-invalidation handling.
//! Mutating endpoints that may race with other clients get idempotent
//! variants that swallow `folder_not_found` / `file_not_found`.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{ProtocolError, ProtocolResult};
use crate::transport::Transport;
use crate::types::*;

/// Outcome of a `dir/create` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DirCreateOutcome {
    /// The folder was created under the requested UUID.
    Created,
    /// A sibling with the same name hash already exists; the server
    /// returned its UUID.
    Exists { uuid: String },
}

/// Typed API client.
pub struct ApiClient {
    transport: Arc<Transport>,
}

impl ApiClient {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    // ── Auth and account ──

    pub async fn auth_info(&self, email: &str) -> ProtocolResult<AuthInfo> {
        let resp = self
            .transport
            .request("/v3/auth/info", json!({ "email": email }))
            .await?;
        expect_data(resp)
    }

    /// Logs in with an already-derived password; key derivation lives in
    /// the crypto layer, not here.
    pub async fn login(
        &self,
        email: &str,
        derived_password: &str,
        two_factor_code: &str,
        auth_version: u32,
    ) -> ProtocolResult<LoginData> {
        let resp = self
            .transport
            .request(
                "/v3/login",
                json!({
                    "email": email,
                    "password": derived_password,
                    "twoFactorCode": two_factor_code,
                    "authVersion": auth_version,
                }),
            )
            .await?;
        expect_data(resp)
    }

    pub async fn user_info(&self) -> ProtocolResult<UserInfo> {
        let resp = self.transport.request("/v3/user/info", json!({})).await?;
        expect_data(resp)
    }

    pub async fn user_base_folder(&self) -> ProtocolResult<String> {
        #[derive(Deserialize)]
        struct Data {
            uuid: String,
        }
        let resp = self
            .transport
            .request("/v3/user/baseFolder", json!({}))
            .await?;
        let data: Data = expect_data(resp)?;
        Ok(data.uuid)
    }

    // ── Listings and presence ──

    pub async fn dir_content(&self, uuid: &str) -> ProtocolResult<DirListing> {
        let resp = self
            .transport
            .request("/v3/dir/content", json!({ "uuid": uuid }))
            .await?;
        expect_data(resp)
    }

    /// Full subtree of a folder, used by the propagation fan-outs.
    pub async fn dir_download(&self, uuid: &str) -> ProtocolResult<DirListing> {
        let resp = self
            .transport
            .request("/v3/dir/download", json!({ "uuid": uuid }))
            .await?;
        expect_data(resp)
    }

    pub async fn dir_tree(&self, uuid: &str) -> ProtocolResult<DirListing> {
        let resp = self
            .transport
            .request("/v3/dir/tree", json!({ "uuid": uuid }))
            .await?;
        expect_data(resp)
    }

    pub async fn dir_present(&self, uuid: &str) -> ProtocolResult<PresenceInfo> {
        let resp = self
            .transport
            .request("/v3/dir/present", json!({ "uuid": uuid }))
            .await?;
        expect_data(resp)
    }

    pub async fn file_present(&self, uuid: &str) -> ProtocolResult<PresenceInfo> {
        let resp = self
            .transport
            .request("/v3/file/present", json!({ "uuid": uuid }))
            .await?;
        expect_data(resp)
    }

    pub async fn dir_exists(&self, name_hashed: &str, parent: &str) -> ProtocolResult<ExistsInfo> {
        let resp = self
            .transport
            .request(
                "/v3/dir/exists",
                json!({ "nameHashed": name_hashed, "parent": parent }),
            )
            .await?;
        expect_data(resp)
    }

    pub async fn file_exists(&self, name_hashed: &str, parent: &str) -> ProtocolResult<ExistsInfo> {
        let resp = self
            .transport
            .request(
                "/v3/file/exists",
                json!({ "nameHashed": name_hashed, "parent": parent }),
            )
            .await?;
        expect_data(resp)
    }

    pub async fn file_info(&self, uuid: &str) -> ProtocolResult<RemoteFile> {
        let resp = self
            .transport
            .request("/v3/file", json!({ "uuid": uuid }))
            .await?;
        expect_data(resp)
    }

    // ── Mutations ──

    pub async fn dir_create(
        &self,
        uuid: &str,
        name_encrypted: &str,
        name_hashed: &str,
        parent: &str,
    ) -> ProtocolResult<DirCreateOutcome> {
        let resp = self
            .transport
            .request(
                "/v3/dir/create",
                json!({
                    "uuid": uuid,
                    "name": name_encrypted,
                    "nameHashed": name_hashed,
                    "parent": parent,
                }),
            )
            .await?;

        if resp.status {
            return Ok(DirCreateOutcome::Created);
        }
        // Idempotent create by name: the server hands back the existing
        // sibling's UUID instead of creating a duplicate.
        if let Some(existing) = resp
            .data
            .as_ref()
            .and_then(|data| data.get("existsUUID"))
            .and_then(|value| value.as_str())
        {
            debug!(uuid, existing, "folder already exists, reusing");
            return Ok(DirCreateOutcome::Exists {
                uuid: existing.to_string(),
            });
        }
        Err(server_error(resp))
    }

    pub async fn dir_trash(&self, uuid: &str) -> ProtocolResult<()> {
        let resp = self
            .transport
            .request("/v3/dir/trash", json!({ "uuid": uuid }))
            .await?;
        ok_or_absent(resp)
    }

    pub async fn file_trash(&self, uuid: &str) -> ProtocolResult<()> {
        let resp = self
            .transport
            .request("/v3/file/trash", json!({ "uuid": uuid }))
            .await?;
        ok_or_absent(resp)
    }

    pub async fn file_move(&self, uuid: &str, to_parent: &str) -> ProtocolResult<()> {
        let resp = self
            .transport
            .request(
                "/v3/file/move",
                json!({ "uuid": uuid, "to": to_parent }),
            )
            .await?;
        ok_or_absent(resp)
    }

    pub async fn dir_move(&self, uuid: &str, to_parent: &str) -> ProtocolResult<()> {
        let resp = self
            .transport
            .request(
                "/v3/dir/move",
                json!({ "uuid": uuid, "to": to_parent }),
            )
            .await?;
        ok_or_absent(resp)
    }

    pub async fn file_rename(
        &self,
        uuid: &str,
        name_encrypted: &str,
        name_hashed: &str,
        metadata: &str,
    ) -> ProtocolResult<()> {
        let resp = self
            .transport
            .request(
                "/v3/file/rename",
                json!({
                    "uuid": uuid,
                    "name": name_encrypted,
                    "nameHashed": name_hashed,
                    "metadata": metadata,
                }),
            )
            .await?;
        ok_or_absent(resp)
    }

    pub async fn dir_rename(
        &self,
        uuid: &str,
        name_encrypted: &str,
        name_hashed: &str,
    ) -> ProtocolResult<()> {
        let resp = self
            .transport
            .request(
                "/v3/dir/rename",
                json!({
                    "uuid": uuid,
                    "name": name_encrypted,
                    "nameHashed": name_hashed,
                }),
            )
            .await?;
        ok_or_absent(resp)
    }

    // ── Sharing ──

    pub async fn dir_shared(&self, uuid: &str) -> ProtocolResult<ShareStatus> {
        let resp = self
            .transport
            .request("/v3/dir/shared", json!({ "uuid": uuid }))
            .await?;
        expect_data(resp)
    }

    pub async fn item_shared(&self, uuid: &str) -> ProtocolResult<ShareStatus> {
        let resp = self
            .transport
            .request("/v3/item/shared", json!({ "uuid": uuid }))
            .await?;
        expect_data(resp)
    }

    pub async fn item_share(
        &self,
        uuid: &str,
        parent: &str,
        email: &str,
        kind: ItemKind,
        metadata: &str,
    ) -> ProtocolResult<()> {
        let resp = self
            .transport
            .request(
                "/v3/item/share",
                json!({
                    "uuid": uuid,
                    "parent": parent,
                    "email": email,
                    "type": kind.as_str(),
                    "metadata": metadata,
                }),
            )
            .await?;
        expect_ok(resp)
    }

    pub async fn item_shared_rename(
        &self,
        uuid: &str,
        receiver_id: u64,
        metadata: &str,
    ) -> ProtocolResult<()> {
        let resp = self
            .transport
            .request(
                "/v3/item/shared/rename",
                json!({
                    "uuid": uuid,
                    "receiverId": receiver_id,
                    "metadata": metadata,
                }),
            )
            .await?;
        expect_ok(resp)
    }

    // ── Public links ──

    pub async fn dir_linked(&self, uuid: &str) -> ProtocolResult<LinkStatus> {
        let resp = self
            .transport
            .request("/v3/dir/linked", json!({ "uuid": uuid }))
            .await?;
        expect_data(resp)
    }

    pub async fn item_linked(&self, uuid: &str) -> ProtocolResult<LinkStatus> {
        let resp = self
            .transport
            .request("/v3/item/linked", json!({ "uuid": uuid }))
            .await?;
        expect_data(resp)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn dir_link_add(
        &self,
        uuid: &str,
        parent: &str,
        link_uuid: &str,
        kind: ItemKind,
        metadata: &str,
        link_key: &str,
        expiration: &str,
    ) -> ProtocolResult<()> {
        let resp = self
            .transport
            .request(
                "/v3/dir/link/add",
                json!({
                    "uuid": uuid,
                    "parent": parent,
                    "linkUUID": link_uuid,
                    "type": kind.as_str(),
                    "metadata": metadata,
                    "key": link_key,
                    "expiration": expiration,
                }),
            )
            .await?;
        expect_ok(resp)
    }

    pub async fn item_linked_rename(
        &self,
        uuid: &str,
        link_uuid: &str,
        metadata: &str,
    ) -> ProtocolResult<()> {
        let resp = self
            .transport
            .request(
                "/v3/item/linked/rename",
                json!({
                    "uuid": uuid,
                    "linkUUID": link_uuid,
                    "metadata": metadata,
                }),
            )
            .await?;
        expect_ok(resp)
    }

    pub async fn file_link_status(&self, uuid: &str) -> ProtocolResult<PublicLinkInfo> {
        let resp = self
            .transport
            .request("/v3/file/link/status", json!({ "uuid": uuid }))
            .await?;
        expect_data(resp)
    }

    pub async fn dir_link_status(&self, uuid: &str) -> ProtocolResult<PublicLinkInfo> {
        let resp = self
            .transport
            .request("/v3/dir/link/status", json!({ "uuid": uuid }))
            .await?;
        expect_data(resp)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn file_link_edit(
        &self,
        link_uuid: &str,
        file_uuid: &str,
        password: &str,
        password_hashed: &str,
        salt: &str,
        expiration: &str,
        edit_type: &str,
    ) -> ProtocolResult<()> {
        let resp = self
            .transport
            .request(
                "/v3/file/link/edit",
                json!({
                    "uuid": link_uuid,
                    "fileUUID": file_uuid,
                    "expiration": expiration,
                    "password": password,
                    "passwordHashed": password_hashed,
                    "salt": salt,
                    "downloadBtn": true,
                    "type": edit_type,
                }),
            )
            .await?;
        expect_ok(resp)
    }

    pub async fn dir_link_remove(&self, uuid: &str) -> ProtocolResult<()> {
        let resp = self
            .transport
            .request("/v3/dir/link/remove", json!({ "uuid": uuid }))
            .await?;
        expect_ok(resp)
    }

    // ── Uploads ──

    pub async fn upload_done(&self, done: &UploadDoneRequest) -> ProtocolResult<UploadDoneData> {
        let resp = self
            .transport
            .request("/v3/upload/done", serde_json::to_value(done)?)
            .await?;
        expect_data(resp)
    }
}

/// Decodes the `data` member of a successful envelope.
fn expect_data<T: DeserializeOwned>(resp: ApiResponse) -> ProtocolResult<T> {
    if !resp.status {
        return Err(server_error(resp));
    }
    let data = resp.data.unwrap_or(serde_json::Value::Null);
    Ok(serde_json::from_value(data)?)
}

/// Requires a successful envelope, discarding any payload.
fn expect_ok(resp: ApiResponse) -> ProtocolResult<()> {
    if resp.status {
        Ok(())
    } else {
        Err(server_error(resp))
    }
}

/// Successful, or the target is already gone (idempotent mutations).
fn ok_or_absent(resp: ApiResponse) -> ProtocolResult<()> {
    if resp.status {
        return Ok(());
    }
    match resp.code.as_deref() {
        Some("folder_not_found") | Some("file_not_found") => {
            debug!(code = resp.code.as_deref(), "target already absent");
            Ok(())
        }
        _ => Err(server_error(resp)),
    }
}

fn server_error(resp: ApiResponse) -> ProtocolError {
    ProtocolError::Server {
        message: resp
            .message
            .unwrap_or_else(|| "unknown server error".to_string()),
        code: resp.code,
    }
}
