//! Abstract cryptographic operations.
//!
//! The protocol core never implements ciphers itself; the embedding
//! application injects a [`MetadataCrypto`] implementation. The only
//! concrete primitive here is SHA-512 payload hashing, which is part of
//! the wire protocol rather than the encryption scheme.

use sha2::{Digest, Sha512};

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::FileMeta;

/// Ordered master key list. The last element is the current encryption
/// key; any element may decrypt (trial decryption).
#[derive(Clone, Debug)]
pub struct MasterKeys(Vec<String>);

impl MasterKeys {
    pub fn new(keys: Vec<String>) -> ProtocolResult<Self> {
        if keys.is_empty() {
            return Err(ProtocolError::Crypto("empty master key list".into()));
        }
        Ok(Self(keys))
    }

    /// Current encryption key.
    pub fn current(&self) -> &str {
        self.0.last().expect("master key list is never empty")
    }

    /// All keys, oldest first, for trial decryption.
    pub fn all(&self) -> &[String] {
        &self.0
    }
}

/// Cryptographic collaborator injected by the embedding application.
pub trait MetadataCrypto: Send + Sync {
    /// Deterministic 64-hex-char hash of an already-lowercased name.
    fn name_hash(&self, lowercase_name: &str) -> String;

    /// Encrypts a serialized metadata record under a symmetric key.
    fn encrypt_metadata(&self, plaintext: &str, key: &str) -> ProtocolResult<String>;

    /// Encrypts a serialized metadata record under a recipient public key.
    fn encrypt_metadata_public_key(
        &self,
        plaintext: &str,
        public_key: &str,
    ) -> ProtocolResult<String>;

    /// Trial-decrypts a file metadata blob against the master key list.
    fn decrypt_file_metadata(&self, blob: &str, keys: &MasterKeys) -> ProtocolResult<FileMeta>;

    /// Trial-decrypts a folder name blob against the master key list.
    fn decrypt_folder_name(&self, blob: &str, keys: &MasterKeys) -> ProtocolResult<String>;

    /// Recovers a link's symmetric key from its encrypted form.
    fn decrypt_folder_link_key(&self, blob: &str, keys: &MasterKeys) -> ProtocolResult<String>;
}

/// SHA-512 hex digest of a byte buffer. Used for the `Checksum` header
/// and per-chunk hashes.
pub fn buffer_to_hash(bytes: &[u8]) -> String {
    hex::encode(Sha512::digest(bytes))
}

/// Removes HTML tags from a decrypted string.
///
/// Server or legacy-client corruption has produced tagged names in the
/// wild; stripping keeps them from reaching recipients verbatim.
pub fn strip_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for ch in input.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}
