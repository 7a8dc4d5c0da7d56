//! Store reader/writer contracts.
//!
//! Anything that can be the source or the destination of a reconciliation
//! implements these: the local query store, a remote file tree, and the
//! staging overlay.

mod local;
mod tree;

pub use local::LocalStore;
pub use tree::{FileTreeStore, INDEX_FILE, entity_path, file_path, link_path};

use crate::error::SyncResult;
use async_trait::async_trait;
use lorebook_types::{
    EntityId, EntityIndex, EntityLinkPair, EntityLinkResult, FileIndex, StoreState, Version,
};

/// Read side of a store.
#[async_trait]
pub trait StoreReader: Send + Sync {
    /// Full index snapshot, tombstones included.
    async fn read_store_state(&self) -> SyncResult<StoreState>;

    async fn entity_index(&self, id: &EntityId) -> SyncResult<Option<EntityIndex>>;

    /// Content of an active entity.
    async fn entity_content(&self, id: &EntityId) -> SyncResult<Option<serde_json::Value>>;

    /// Active links touching `id`, oriented from its side.
    async fn links_of(&self, id: &EntityId) -> SyncResult<Vec<EntityLinkResult>>;

    /// Payload of an active link.
    async fn link_payload(&self, pair: &EntityLinkPair) -> SyncResult<Option<serde_json::Value>>;

    async fn file_index(&self, name: &str) -> SyncResult<Option<FileIndex>>;

    /// Bytes of an active file.
    async fn read_file(&self, name: &str) -> SyncResult<Option<Vec<u8>>>;
}

/// Write side of a store. Writes may be buffered until [`StoreWriter::commit`].
#[async_trait]
pub trait StoreWriter: Send + Sync {
    async fn put_entity(
        &self,
        id: &EntityId,
        version: Version,
        content: serde_json::Value,
    ) -> SyncResult<()>;

    async fn delete_entity(&self, id: &EntityId, version: Version) -> SyncResult<()>;

    async fn put_file(&self, name: &str, version: Version, content: Vec<u8>) -> SyncResult<()>;

    async fn delete_file(&self, name: &str, version: Version) -> SyncResult<()>;

    async fn put_link(
        &self,
        pair: &EntityLinkPair,
        version: Version,
        payload: serde_json::Value,
    ) -> SyncResult<()>;

    async fn delete_link(&self, pair: &EntityLinkPair, version: Version) -> SyncResult<()>;

    /// Makes every buffered write durable.
    async fn commit(&self) -> SyncResult<()>;
}

/// A store that can be both read and written.
pub trait StoreBackend: StoreReader + StoreWriter {}

impl<T: StoreReader + StoreWriter + ?Sized> StoreBackend for T {}
