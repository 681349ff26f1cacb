//! Metadata propagation to share recipients and public links.
//!
//! Every mutating item operation calls in here after the server accepted
//! the primary change. Propagation is best-effort: per-target failures
//! are logged and counted as done, and callers never observe them — the
//! authoritative state is already updated, only the recipients' view may
//! lag.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::crypto::{strip_html, MasterKeys, MetadataCrypto};
use crate::types::*;

/// One item scheduled for propagation.
struct FanOutItem {
    uuid: String,
    parent: String,
    kind: ItemKind,
    meta: Metadata,
}

/// A public link with its recovered symmetric key.
struct RecoveredLink {
    link_uuid: String,
    /// Encrypted form, passed through on `dir/link/add`.
    link_key: String,
    key: String,
}

/// Fans metadata changes out to share grantees and link consumers.
pub struct MetadataPropagator {
    api: Arc<ApiClient>,
    crypto: Arc<dyn MetadataCrypto>,
}

impl MetadataPropagator {
    pub fn new(api: Arc<ApiClient>, crypto: Arc<dyn MetadataCrypto>) -> Self {
        Self { api, crypto }
    }

    /// Called after create/move, when an item enters `parent`.
    ///
    /// Runs the share and link fan-outs concurrently and returns once
    /// both have completed.
    pub async fn on_parent_mutation(
        &self,
        kind: ItemKind,
        parent: &str,
        uuid: &str,
        meta: &Metadata,
    ) {
        let Some(keys) = self.api.transport().store().master_keys() else {
            warn!(uuid, "no master keys loaded, skipping propagation");
            return;
        };

        tokio::join!(
            self.fan_out_shares(kind, parent, uuid, meta, &keys),
            self.fan_out_links(kind, parent, uuid, meta, &keys),
        );
    }

    /// Called after rename, when an item's metadata changes in place.
    pub async fn on_item_rename(&self, kind: ItemKind, uuid: &str, meta: &Metadata) {
        let Some(keys) = self.api.transport().store().master_keys() else {
            warn!(uuid, "no master keys loaded, skipping propagation");
            return;
        };
        debug!(uuid, kind = kind.as_str(), "propagating rename");

        tokio::join!(
            self.rename_fan_out_shares(uuid, meta),
            self.rename_fan_out_links(uuid, meta, &keys),
        );
    }

    // ── Parent-mutation fan-outs ──

    async fn fan_out_shares(
        &self,
        kind: ItemKind,
        parent: &str,
        uuid: &str,
        meta: &Metadata,
        keys: &MasterKeys,
    ) {
        let status = match self.api.dir_shared(parent).await {
            Ok(status) => status,
            Err(err) => {
                warn!(parent, error = %err, "share lookup failed, skipping share fan-out");
                return;
            }
        };
        if !status.sharing || status.users.is_empty() {
            return;
        }

        let items = self.collect_items(kind, parent, uuid, meta, keys).await;
        let mut dispatches = Vec::with_capacity(items.len() * status.users.len());
        for item in &items {
            for user in &status.users {
                dispatches.push(self.share_item_with(item, user));
            }
        }
        join_all(dispatches).await;
    }

    async fn share_item_with(&self, item: &FanOutItem, user: &ShareRecipient) {
        let encrypted = match self
            .crypto
            .encrypt_metadata_public_key(&item.meta.to_plaintext(), &user.public_key)
        {
            Ok(encrypted) => encrypted,
            Err(err) => {
                warn!(uuid = %item.uuid, email = %user.email, error = %err, "recipient encryption failed");
                return;
            }
        };
        if let Err(err) = self
            .api
            .item_share(&item.uuid, &item.parent, &user.email, item.kind, &encrypted)
            .await
        {
            warn!(uuid = %item.uuid, email = %user.email, error = %err, "share dispatch failed");
        }
    }

    async fn fan_out_links(
        &self,
        kind: ItemKind,
        parent: &str,
        uuid: &str,
        meta: &Metadata,
        keys: &MasterKeys,
    ) {
        let status = match self.api.dir_linked(parent).await {
            Ok(status) => status,
            Err(err) => {
                warn!(parent, error = %err, "link lookup failed, skipping link fan-out");
                return;
            }
        };
        if !status.link {
            return;
        }
        let links = recover_links(self.crypto.as_ref(), &status, keys);
        if links.is_empty() {
            return;
        }

        let items = self.collect_items(kind, parent, uuid, meta, keys).await;
        let mut dispatches = Vec::with_capacity(items.len() * links.len());
        for item in &items {
            for link in &links {
                dispatches.push(self.link_item_with(item, link));
            }
        }
        join_all(dispatches).await;
    }

    async fn link_item_with(&self, item: &FanOutItem, link: &RecoveredLink) {
        let encrypted = match self
            .crypto
            .encrypt_metadata(&item.meta.to_plaintext(), &link.key)
        {
            Ok(encrypted) => encrypted,
            Err(err) => {
                warn!(uuid = %item.uuid, link = %link.link_uuid, error = %err, "link encryption failed");
                return;
            }
        };
        if let Err(err) = self
            .api
            .dir_link_add(
                &item.uuid,
                &item.parent,
                &link.link_uuid,
                item.kind,
                &encrypted,
                &link.link_key,
                "never",
            )
            .await
        {
            warn!(uuid = %item.uuid, link = %link.link_uuid, error = %err, "link dispatch failed");
        }
    }

    /// Enumerates the items a fan-out must cover: the mutated item, plus
    /// the whole decryptable subtree when it is a folder.
    ///
    /// Undecryptable entries are skipped; recovered names and MIME types
    /// are stripped of HTML tags before re-encryption.
    async fn collect_items(
        &self,
        kind: ItemKind,
        parent: &str,
        uuid: &str,
        meta: &Metadata,
        keys: &MasterKeys,
    ) -> Vec<FanOutItem> {
        let mut items = vec![FanOutItem {
            uuid: uuid.to_string(),
            parent: parent.to_string(),
            kind,
            meta: meta.clone(),
        }];
        if kind != ItemKind::Folder {
            return items;
        }

        let listing = match self.api.dir_download(uuid).await {
            Ok(listing) => listing,
            Err(err) => {
                warn!(uuid, error = %err, "subtree listing failed, propagating the folder alone");
                return items;
            }
        };

        for folder in &listing.folders {
            // The listing includes the subtree root itself; it is already
            // the first entry above.
            if folder.uuid == uuid {
                continue;
            }
            match self.crypto.decrypt_folder_name(&folder.name, keys) {
                Ok(name) => items.push(FanOutItem {
                    uuid: folder.uuid.clone(),
                    parent: folder.parent.clone(),
                    kind: ItemKind::Folder,
                    meta: Metadata::Folder(FolderMeta {
                        name: strip_html(&name),
                    }),
                }),
                Err(err) => {
                    debug!(uuid = %folder.uuid, error = %err, "skipping undecryptable folder");
                }
            }
        }
        for file in &listing.files {
            match self.crypto.decrypt_file_metadata(&file.metadata, keys) {
                Ok(mut file_meta) => {
                    file_meta.name = strip_html(&file_meta.name);
                    file_meta.mime = strip_html(&file_meta.mime);
                    items.push(FanOutItem {
                        uuid: file.uuid.clone(),
                        parent: file.parent.clone(),
                        kind: ItemKind::File,
                        meta: Metadata::File(file_meta),
                    });
                }
                Err(err) => {
                    debug!(uuid = %file.uuid, error = %err, "skipping undecryptable file");
                }
            }
        }
        items
    }

    // ── Rename fan-outs ──

    async fn rename_fan_out_shares(&self, uuid: &str, meta: &Metadata) {
        let status = match self.api.item_shared(uuid).await {
            Ok(status) => status,
            Err(err) => {
                warn!(uuid, error = %err, "shared lookup failed, skipping rename fan-out");
                return;
            }
        };
        if !status.sharing || status.users.is_empty() {
            return;
        }

        let dispatches = status.users.iter().map(|user| async move {
            let encrypted = match self
                .crypto
                .encrypt_metadata_public_key(&meta.to_plaintext(), &user.public_key)
            {
                Ok(encrypted) => encrypted,
                Err(err) => {
                    warn!(uuid, email = %user.email, error = %err, "recipient encryption failed");
                    return;
                }
            };
            if let Err(err) = self
                .api
                .item_shared_rename(uuid, user.id, &encrypted)
                .await
            {
                warn!(uuid, email = %user.email, error = %err, "shared rename dispatch failed");
            }
        });
        join_all(dispatches).await;
    }

    async fn rename_fan_out_links(&self, uuid: &str, meta: &Metadata, keys: &MasterKeys) {
        let status = match self.api.item_linked(uuid).await {
            Ok(status) => status,
            Err(err) => {
                warn!(uuid, error = %err, "linked lookup failed, skipping rename fan-out");
                return;
            }
        };
        if !status.link {
            return;
        }
        let links = recover_links(self.crypto.as_ref(), &status, keys);
        if links.is_empty() {
            return;
        }

        let dispatches = links.iter().map(|link| async move {
            let encrypted = match self.crypto.encrypt_metadata(&meta.to_plaintext(), &link.key) {
                Ok(encrypted) => encrypted,
                Err(err) => {
                    warn!(uuid, link = %link.link_uuid, error = %err, "link encryption failed");
                    return;
                }
            };
            if let Err(err) = self
                .api
                .item_linked_rename(uuid, &link.link_uuid, &encrypted)
                .await
            {
                warn!(uuid, link = %link.link_uuid, error = %err, "linked rename dispatch failed");
            }
        });
        join_all(dispatches).await;
    }
}

/// Recovers each link's symmetric key via trial decryption against the
/// master key list, skipping links whose key does not recover.
fn recover_links(
    crypto: &dyn MetadataCrypto,
    status: &LinkStatus,
    keys: &MasterKeys,
) -> Vec<RecoveredLink> {
    status
        .links
        .iter()
        .filter_map(|link| match crypto.decrypt_folder_link_key(&link.link_key, keys) {
            Ok(key) => Some(RecoveredLink {
                link_uuid: link.link_uuid.clone(),
                link_key: link.link_key.clone(),
                key,
            }),
            Err(err) => {
                debug!(link = %link.link_uuid, error = %err, "skipping unrecoverable link key");
                None
            }
        })
        .collect()
}
