//! Store contracts over a remote file tree.
//!
//! Layout:
//!
//! ```text
//! index.json                    serialized StoreState
//! entities/{type}/{id}.json     entity content
//! files/{name}                  raw file bytes
//! links/{pair key}.json         link payload
//! ```
//!
//! Every path segment is percent-encoded. A write older than the version
//! the index records fails with `StaleVersion`. Writes are staged in the backend's
//! write buffer together with the updated `index.json`, so a commit lands
//! the index and the content it describes at once.

use super::{StoreReader, StoreWriter};
use crate::backend::{FileBackend, FileReadonlyBackend, FileReader, FileWriter};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use lorebook_types::{
    EntityId, EntityIndex, EntityLink, EntityLinkPair, EntityLinkResult, FileIndex, ItemStatus,
    StoreIndex, StoreState, Version,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Path of the serialized index.
pub const INDEX_FILE: &str = "index.json";

fn encode(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

pub fn entity_path(id: &EntityId) -> String {
    format!("entities/{}/{}.json", encode(&id.entity_type), encode(&id.id))
}

pub fn file_path(name: &str) -> String {
    format!("files/{}", encode(name))
}

pub fn link_path(pair: &EntityLinkPair) -> String {
    format!("links/{}.json", encode(&pair.key()))
}

struct TreeState {
    /// Cached index, including staged changes.
    index: Option<StoreIndex>,
    writer: Option<Box<dyn FileWriter>>,
    /// Content staged but not yet committed; `None` marks a staged delete.
    staged: BTreeMap<String, Option<Vec<u8>>>,
    dirty: bool,
}

/// A [`StoreReader`]/[`StoreWriter`] over any file backend.
pub struct FileTreeStore {
    reader: Arc<dyn FileReader>,
    state: Mutex<TreeState>,
}

impl FileTreeStore {
    /// Read-write store over `backend`.
    pub fn new<B: FileBackend + ?Sized>(backend: &B) -> Self {
        Self::build(backend.reader(), Some(backend.writer()))
    }

    /// Read-only store; writes fail with `InvalidState`.
    pub fn readonly<B: FileReadonlyBackend + ?Sized>(backend: &B) -> Self {
        Self::build(backend.reader(), None)
    }

    fn build(reader: Arc<dyn FileReader>, writer: Option<Box<dyn FileWriter>>) -> Self {
        Self {
            reader,
            state: Mutex::new(TreeState {
                index: None,
                writer,
                staged: BTreeMap::new(),
                dirty: false,
            }),
        }
    }

    /// Drops the cached index so the next read fetches it again. Staged
    /// writes are kept.
    pub async fn refresh(&self) {
        let mut state = self.state.lock().await;
        if !state.dirty {
            state.index = None;
        }
    }

    /// Whether writes are staged but not committed.
    pub async fn has_pending_writes(&self) -> bool {
        self.state.lock().await.dirty
    }

    async fn fetch_index(&self) -> SyncResult<StoreIndex> {
        match self.reader.read(INDEX_FILE).await? {
            Some(bytes) => Ok(serde_json::from_slice::<StoreState>(&bytes)?.into()),
            None => {
                debug!("Remote has no {}, treating it as empty", INDEX_FILE);
                Ok(StoreIndex::default())
            }
        }
    }

    async fn index<'a>(&self, state: &'a mut TreeState) -> SyncResult<&'a mut StoreIndex> {
        if state.index.is_none() {
            state.index = Some(self.fetch_index().await?);
        }
        state
            .index
            .as_mut()
            .ok_or_else(|| SyncError::InvalidState("index not loaded".to_string()))
    }

    async fn read_path(&self, path: &str) -> SyncResult<Option<Vec<u8>>> {
        {
            let state = self.state.lock().await;
            if let Some(staged) = state.staged.get(path) {
                return Ok(staged.clone());
            }
        }
        self.reader.read(path).await
    }

    fn stage_write(state: &mut TreeState, path: String, content: Vec<u8>) -> SyncResult<()> {
        let writer = state
            .writer
            .as_mut()
            .ok_or_else(|| SyncError::InvalidState("store is read-only".to_string()))?;
        writer.write(&path, content.clone());
        state.staged.insert(path, Some(content));
        state.dirty = true;
        Ok(())
    }

    fn stage_delete(state: &mut TreeState, path: String) -> SyncResult<()> {
        let writer = state
            .writer
            .as_mut()
            .ok_or_else(|| SyncError::InvalidState("store is read-only".to_string()))?;
        writer.delete(&path);
        state.staged.insert(path, None);
        state.dirty = true;
        Ok(())
    }

    fn ensure_writable(state: &TreeState) -> SyncResult<()> {
        if state.writer.is_none() {
            return Err(SyncError::InvalidState("store is read-only".to_string()));
        }
        Ok(())
    }

    /// Rejects a write older than what the index already records.
    fn ensure_not_stale(
        key: impl FnOnce() -> String,
        stored: Option<Version>,
        attempted: Version,
    ) -> SyncResult<()> {
        match stored {
            Some(stored) if stored > attempted => Err(SyncError::StaleVersion {
                key: key(),
                stored,
                attempted,
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl StoreReader for FileTreeStore {
    async fn read_store_state(&self) -> SyncResult<StoreState> {
        let mut state = self.state.lock().await;
        if !state.dirty {
            state.index = None;
        }
        Ok(self.index(&mut state).await?.to_state())
    }

    async fn entity_index(&self, id: &EntityId) -> SyncResult<Option<EntityIndex>> {
        let mut state = self.state.lock().await;
        Ok(self.index(&mut state).await?.entity(id).cloned())
    }

    async fn entity_content(&self, id: &EntityId) -> SyncResult<Option<serde_json::Value>> {
        let active = {
            let mut state = self.state.lock().await;
            self.index(&mut state)
                .await?
                .entity(id)
                .is_some_and(|e| e.status.is_active())
        };
        if !active {
            return Ok(None);
        }
        match self.read_path(&entity_path(id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn links_of(&self, id: &EntityId) -> SyncResult<Vec<EntityLinkResult>> {
        let links: Vec<EntityLink> = {
            let mut state = self.state.lock().await;
            self.index(&mut state)
                .await?
                .links()
                .filter(|l| l.status.is_active() && l.pair.touches(id))
                .cloned()
                .collect()
        };

        let mut results = Vec::with_capacity(links.len());
        for link in links {
            let payload = match self.read_path(&link_path(&link.pair)).await? {
                Some(bytes) => serde_json::from_slice(&bytes)?,
                None => serde_json::Value::Null,
            };
            if let Some(result) = EntityLinkResult::from_pair(&link.pair, id, payload, link.version) {
                results.push(result);
            }
        }
        results.sort_by(|a, b| a.pair().cmp(&b.pair()));
        Ok(results)
    }

    async fn link_payload(&self, pair: &EntityLinkPair) -> SyncResult<Option<serde_json::Value>> {
        let active = {
            let mut state = self.state.lock().await;
            self.index(&mut state)
                .await?
                .link(pair)
                .is_some_and(|l| l.status.is_active())
        };
        if !active {
            return Ok(None);
        }
        match self.read_path(&link_path(pair)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(Some(serde_json::Value::Null)),
        }
    }

    async fn file_index(&self, name: &str) -> SyncResult<Option<FileIndex>> {
        let mut state = self.state.lock().await;
        Ok(self.index(&mut state).await?.file(name).cloned())
    }

    async fn read_file(&self, name: &str) -> SyncResult<Option<Vec<u8>>> {
        let active = {
            let mut state = self.state.lock().await;
            self.index(&mut state)
                .await?
                .file(name)
                .is_some_and(|f| f.status.is_active())
        };
        if !active {
            return Ok(None);
        }
        self.read_path(&file_path(name)).await
    }
}

#[async_trait]
impl StoreWriter for FileTreeStore {
    async fn put_entity(
        &self,
        id: &EntityId,
        version: Version,
        content: serde_json::Value,
    ) -> SyncResult<()> {
        let bytes = serde_json::to_vec_pretty(&content)?;
        let mut state = self.state.lock().await;
        Self::ensure_writable(&state)?;
        let index = self.index(&mut state).await?;
        Self::ensure_not_stale(|| id.to_string(), index.entity(id).map(|e| e.version), version)?;
        index.upsert_entity(EntityIndex::active(id.clone(), version));
        Self::stage_write(&mut state, entity_path(id), bytes)
    }

    async fn delete_entity(&self, id: &EntityId, version: Version) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        Self::ensure_writable(&state)?;
        let index = self.index(&mut state).await?;
        Self::ensure_not_stale(|| id.to_string(), index.entity(id).map(|e| e.version), version)?;
        let had_content = index.entity(id).is_some_and(|e| e.status.is_active());
        index.upsert_entity(EntityIndex::deleted(id.clone(), version));
        state.dirty = true;
        if had_content {
            Self::stage_delete(&mut state, entity_path(id))?;
        }
        Ok(())
    }

    async fn put_file(&self, name: &str, version: Version, content: Vec<u8>) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        Self::ensure_writable(&state)?;
        let index = self.index(&mut state).await?;
        Self::ensure_not_stale(|| name.to_string(), index.file(name).map(|f| f.version), version)?;
        index.upsert_file(FileIndex::active(name, version));
        Self::stage_write(&mut state, file_path(name), content)
    }

    async fn delete_file(&self, name: &str, version: Version) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        Self::ensure_writable(&state)?;
        let index = self.index(&mut state).await?;
        Self::ensure_not_stale(|| name.to_string(), index.file(name).map(|f| f.version), version)?;
        let had_content = index.file(name).is_some_and(|f| f.status.is_active());
        index.upsert_file(FileIndex::deleted(name, version));
        state.dirty = true;
        if had_content {
            Self::stage_delete(&mut state, file_path(name))?;
        }
        Ok(())
    }

    async fn put_link(
        &self,
        pair: &EntityLinkPair,
        version: Version,
        payload: serde_json::Value,
    ) -> SyncResult<()> {
        let bytes = serde_json::to_vec_pretty(&payload)?;
        let mut state = self.state.lock().await;
        Self::ensure_writable(&state)?;
        let index = self.index(&mut state).await?;
        Self::ensure_not_stale(|| pair.key(), index.link(pair).map(|l| l.version), version)?;
        index.upsert_link(EntityLink::active(pair.clone(), version));
        Self::stage_write(&mut state, link_path(pair), bytes)
    }

    async fn delete_link(&self, pair: &EntityLinkPair, version: Version) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        Self::ensure_writable(&state)?;
        let index = self.index(&mut state).await?;
        Self::ensure_not_stale(|| pair.key(), index.link(pair).map(|l| l.version), version)?;
        let had_payload = index.link(pair).is_some_and(|l| l.status == ItemStatus::Active);
        index.upsert_link(EntityLink::deleted(pair.clone(), version));
        state.dirty = true;
        if had_payload {
            Self::stage_delete(&mut state, link_path(pair))?;
        }
        Ok(())
    }

    async fn commit(&self) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        if !state.dirty {
            return Ok(());
        }
        let index_bytes = match &state.index {
            Some(index) => serde_json::to_vec_pretty(&index.to_state())?,
            None => return Err(SyncError::InvalidState("index not loaded".to_string())),
        };
        let staged = state.staged.len();
        let writer = state
            .writer
            .as_mut()
            .ok_or_else(|| SyncError::InvalidState("store is read-only".to_string()))?;
        writer.write(INDEX_FILE, index_bytes);
        let result = writer.commit().await;

        state.staged.clear();
        state.dirty = false;
        match result {
            Ok(()) => {
                info!("Committed {} remote files plus index", staged);
                Ok(())
            }
            Err(e) => {
                // The remote may hold anything now; re-read it next time.
                state.index = None;
                Err(e)
            }
        }
    }
}
