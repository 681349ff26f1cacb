//! Wire types shared across the protocol core.
//!
//! The server speaks camelCase JSON inside a uniform response envelope
//! `{status, code?, message?, data?}`. Typed payload structs below decode
//! the `data` member per endpoint.

use serde::{Deserialize, Serialize};

/// Uniform server response envelope.
#[derive(Clone, Debug, Deserialize)]
pub struct ApiResponse {
    pub status: bool,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Item kind as it appears on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::File => "file",
            ItemKind::Folder => "folder",
        }
    }
}

/// Plaintext metadata record of a file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub name: String,
    pub size: u64,
    pub mime: String,
    /// Per-item content key under which the file's chunks are encrypted.
    pub key: String,
    pub last_modified: i64,
}

/// Plaintext metadata record of a folder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FolderMeta {
    pub name: String,
}

/// Tagged plaintext metadata of an item.
///
/// Serialized untagged: the wire format is the bare record, and the file
/// variant is distinguished by its extra fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Metadata {
    File(FileMeta),
    Folder(FolderMeta),
}

impl Metadata {
    pub fn kind(&self) -> ItemKind {
        match self {
            Metadata::File(_) => ItemKind::File,
            Metadata::Folder(_) => ItemKind::Folder,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Metadata::File(meta) => &meta.name,
            Metadata::Folder(meta) => &meta.name,
        }
    }

    /// Deterministic plaintext serialization (field order is fixed by the
    /// struct declarations).
    pub fn to_plaintext(&self) -> String {
        serde_json::to_string(self).expect("metadata serialization is infallible")
    }
}

/// User networking settings read from the configuration store.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkingSettings {
    /// Upload limit in Kbps; 0 means unlimited.
    pub upload_kbps: u64,
    /// Download limit in Kbps; 0 means unlimited.
    pub download_kbps: u64,
}

impl Default for NetworkingSettings {
    fn default() -> Self {
        Self {
            upload_kbps: 0,
            download_kbps: 0,
        }
    }
}

// ── Auth and account ──

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthInfo {
    pub auth_version: u32,
    pub salt: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub api_key: String,
    /// Master key list encrypted under the password-derived key.
    pub master_keys: String,
    pub public_key: String,
    pub private_key: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: u64,
    pub email: String,
    #[serde(default)]
    pub storage_used: u64,
    #[serde(default)]
    pub max_storage: u64,
}

// ── Directory and file records ──

/// Encrypted file record as listed by `dir/content`, `dir/download`
/// and `dir/tree`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub uuid: String,
    pub parent: String,
    /// Encrypted metadata blob.
    pub metadata: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub chunks: u64,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub version: u32,
}

/// Encrypted folder record.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFolder {
    pub uuid: String,
    pub parent: String,
    /// Encrypted `{name}` blob.
    pub name: String,
}

/// Listing of a folder subtree (`dir/download`, `dir/tree`) or a single
/// level (`dir/content`).
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DirListing {
    #[serde(default)]
    pub files: Vec<RemoteFile>,
    #[serde(default)]
    pub folders: Vec<RemoteFolder>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PresenceInfo {
    pub present: bool,
    #[serde(default)]
    pub trash: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExistsInfo {
    pub exists: bool,
    #[serde(default)]
    pub uuid: Option<String>,
}

// ── Sharing and links ──

/// Share recipient of a folder subtree or item.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRecipient {
    pub id: u64,
    pub email: String,
    pub public_key: String,
}

/// Share state of a directory or item.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ShareStatus {
    pub sharing: bool,
    #[serde(default)]
    pub users: Vec<ShareRecipient>,
}

/// Public link attached to a directory or item. `link_key` is itself
/// encrypted under the master key list.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkTarget {
    #[serde(rename = "linkUUID")]
    pub link_uuid: String,
    pub link_key: String,
}

/// Link state of a directory or item.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LinkStatus {
    pub link: bool,
    #[serde(default)]
    pub links: Vec<LinkTarget>,
}

/// Public link state of a single file or directory
/// (`file/link/status`, `dir/link/status`).
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicLinkInfo {
    pub enabled: bool,
    #[serde(default, rename = "uuid")]
    pub link_uuid: Option<String>,
}

// ── Transfers ──

/// Addressing of one encrypted chunk.
#[derive(Clone, Debug)]
pub struct ChunkAddress {
    pub region: String,
    pub bucket: String,
    pub uuid: String,
    pub index: u64,
}

/// Query parameters of a chunk upload.
#[derive(Clone, Debug)]
pub struct UploadParams {
    pub uuid: String,
    pub index: u64,
    pub parent: String,
    pub upload_key: String,
}

/// Server response to a chunk upload.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkData {
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub region: String,
}

/// Completion record for `upload/done`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDoneRequest {
    pub uuid: String,
    pub upload_key: String,
}

/// Server summary of a completed upload.
#[derive(Clone, Debug, Deserialize)]
pub struct UploadDoneData {
    pub chunks: u64,
    pub size: u64,
}
