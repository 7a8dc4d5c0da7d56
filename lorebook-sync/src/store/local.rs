//! Store contracts over the local query store.

use super::{StoreReader, StoreWriter};
use crate::error::SyncResult;
use async_trait::async_trait;
use lorebook_storage::{QueryStore, derive_tag_postings, search_terms_for_content};
use lorebook_types::{
    EntityId, EntityIndex, EntityLinkPair, EntityLinkResult, FileIndex, StoreState, Version,
};

/// Adapts a [`QueryStore`] to the store contracts.
///
/// Query store calls block on the DuckDB connection, so each one runs on the
/// blocking pool. Writes are durable immediately and `commit` is a no-op.
#[derive(Clone)]
pub struct LocalStore {
    store: QueryStore,
}

impl LocalStore {
    pub fn new(store: QueryStore) -> Self {
        Self { store }
    }

    pub fn query_store(&self) -> &QueryStore {
        &self.store
    }

    async fn blocking<T, F>(&self, f: F) -> SyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&QueryStore) -> lorebook_storage::StorageResult<T> + Send + 'static,
    {
        let store = self.store.clone();
        Ok(tokio::task::spawn_blocking(move || f(&store)).await??)
    }
}

#[async_trait]
impl StoreReader for LocalStore {
    async fn read_store_state(&self) -> SyncResult<StoreState> {
        self.blocking(|s| s.read_store_state()).await
    }

    async fn entity_index(&self, id: &EntityId) -> SyncResult<Option<EntityIndex>> {
        let id = id.clone();
        self.blocking(move |s| s.get_entity_index(&id)).await
    }

    async fn entity_content(&self, id: &EntityId) -> SyncResult<Option<serde_json::Value>> {
        let id = id.clone();
        self.blocking(move |s| s.get_entity_content(&id)).await
    }

    async fn links_of(&self, id: &EntityId) -> SyncResult<Vec<EntityLinkResult>> {
        let id = id.clone();
        self.blocking(move |s| s.links_of(&id)).await
    }

    async fn link_payload(&self, pair: &EntityLinkPair) -> SyncResult<Option<serde_json::Value>> {
        let pair = pair.clone();
        self.blocking(move |s| s.get_link_payload(&pair)).await
    }

    async fn file_index(&self, name: &str) -> SyncResult<Option<FileIndex>> {
        let name = name.to_string();
        self.blocking(move |s| s.get_file_index(&name)).await
    }

    async fn read_file(&self, name: &str) -> SyncResult<Option<Vec<u8>>> {
        let name = name.to_string();
        self.blocking(move |s| s.read_file(&name)).await
    }
}

#[async_trait]
impl StoreWriter for LocalStore {
    async fn put_entity(
        &self,
        id: &EntityId,
        version: Version,
        content: serde_json::Value,
    ) -> SyncResult<()> {
        let id = id.clone();
        self.blocking(move |s| {
            let tags = derive_tag_postings(&content);
            let terms = search_terms_for_content(&content);
            s.put_entity(&id, version, &content, &tags, &terms)
        })
        .await
    }

    async fn delete_entity(&self, id: &EntityId, version: Version) -> SyncResult<()> {
        let id = id.clone();
        self.blocking(move |s| s.delete_entity(&id, version)).await
    }

    async fn put_file(&self, name: &str, version: Version, content: Vec<u8>) -> SyncResult<()> {
        let name = name.to_string();
        self.blocking(move |s| s.write_file(&name, version, &content))
            .await
    }

    async fn delete_file(&self, name: &str, version: Version) -> SyncResult<()> {
        let name = name.to_string();
        self.blocking(move |s| s.delete_file(&name, version)).await
    }

    async fn put_link(
        &self,
        pair: &EntityLinkPair,
        version: Version,
        payload: serde_json::Value,
    ) -> SyncResult<()> {
        let pair = pair.clone();
        self.blocking(move |s| s.put_link(&pair, version, &payload))
            .await
    }

    async fn delete_link(&self, pair: &EntityLinkPair, version: Version) -> SyncResult<()> {
        let pair = pair.clone();
        self.blocking(move |s| s.delete_link(&pair, version)).await
    }

    async fn commit(&self) -> SyncResult<()> {
        Ok(())
    }
}
