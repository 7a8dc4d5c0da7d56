//! Asynchronous loading from the primary and fallback stores.
//!
//! Every fetch records the write tick when it starts. When it settles, a key
//! that was written locally in the meantime keeps its local state and the
//! fetched value is dropped.

use crate::event::StagingEvent;
use crate::state::{Key, LinkEntry, LinkLoad};
use crate::store::{EntityState, FileState, LinksState, StagingStore, links_state, tombstone};
use lorebook_sync::{StoreReader, SyncError, SyncResult};
use lorebook_types::{
    DataWrapper, EntityId, EntityIndex, EntityLinkResult, ItemStatus, StoreState,
};
use serde_json::Value;
use tracing::{debug, info, warn};

async fn read_entity<S: StoreReader + ?Sized>(
    source: &S,
    id: &EntityId,
) -> SyncResult<Option<(EntityIndex, Option<Value>)>> {
    let Some(index) = source.entity_index(id).await? else {
        return Ok(None);
    };
    let content = match index.status {
        ItemStatus::Active => source.entity_content(id).await?,
        ItemStatus::Deleted => None,
    };
    Ok(Some((index, content)))
}

impl StagingStore {
    /// Reads an entity from the primary store, or the fallback when the
    /// primary has never seen it. Loads its links too when it is active.
    ///
    /// Errors settle as `Failure`, which only another explicit fetch clears.
    pub async fn fetch_entity(&self, id: &EntityId) -> EntityState {
        let started = self.state().tick();
        let loaded = match self.load_entity(id).await {
            Ok(state) => state,
            Err(e) => {
                warn!("Fetch of entity {} failed: {}", id, e);
                DataWrapper::Failure {
                    id: id.clone(),
                    message: e.to_string(),
                }
            }
        };
        let current = self.settle_entity(started, loaded);
        if current.is_active() {
            self.fetch_links(id).await;
        }
        current
    }

    async fn load_entity(&self, id: &EntityId) -> SyncResult<EntityState> {
        let mut found = read_entity(self.inner.primary.as_ref(), id).await?;
        if found.is_none() {
            if let Some(fallback) = &self.inner.fallback {
                found = read_entity(fallback.as_ref(), id).await?;
            }
        }
        match found {
            None => Ok(DataWrapper::missing(id.clone())),
            Some((index, _)) if !index.status.is_active() => Ok(DataWrapper::Deleted {
                id: id.clone(),
                version: index.version,
            }),
            Some((index, Some(data))) => Ok(DataWrapper::Active {
                id: id.clone(),
                data,
                version: index.version,
            }),
            Some((_, None)) => Err(SyncError::NotFound(format!("content of entity {id}"))),
        }
    }

    fn settle_entity(&self, started: u64, state: EntityState) -> EntityState {
        let id = state.id().clone();
        let key = Key::Entity(id.clone());
        {
            let mut st = self.state();
            st.in_flight.remove(&key);
            if st.written_since(&key, started) {
                debug!("Dropping fetched {} behind a local write", id);
                return st
                    .entities
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| DataWrapper::missing(id));
            }
            st.entities.insert(id, state.clone());
        }
        self.emit(StagingEvent::Entity(state.clone()));
        state
    }

    /// Loads the active links of an entity and merges them into the link map.
    ///
    /// A fetched link never replaces one written locally during the fetch or
    /// one already known at the same or a newer version. A link whose
    /// endpoint is a known tombstone at or after the link's version is stored
    /// as deleted.
    pub async fn fetch_links(&self, id: &EntityId) -> LinksState {
        let started = self.state().tick();
        let fetched = self.load_links(id).await;

        let mut changed = Vec::new();
        let state = {
            let mut st = self.state();
            st.in_flight.remove(&Key::Links(id.clone()));
            match fetched {
                Ok(results) => {
                    for result in results {
                        let pair = result.pair();
                        if st.written_since(&Key::Link(pair.clone()), started)
                            || st.links.get(&pair).is_some_and(|e| e.version >= result.version)
                        {
                            continue;
                        }
                        let endpoint_deleted = [&pair.left, &pair.right]
                            .into_iter()
                            .filter_map(|end| st.tombstone_version(&end.entity_id()))
                            .filter(|&version| version >= result.version)
                            .max();
                        let entry = match endpoint_deleted {
                            Some(version) => tombstone(version),
                            None => LinkEntry {
                                status: ItemStatus::Active,
                                version: result.version,
                                payload: result.payload,
                            },
                        };
                        changed.push(StagingEvent::Link {
                            pair: pair.clone(),
                            status: entry.status,
                            version: entry.version,
                        });
                        st.links.insert(pair, entry);
                    }
                    st.link_loads.insert(id.clone(), LinkLoad::Loaded);
                }
                Err(e) => {
                    warn!("Fetch of links of {} failed: {}", id, e);
                    st.link_loads
                        .insert(id.clone(), LinkLoad::Failure(e.to_string()));
                }
            }
            links_state(&st, id)
        };

        for event in changed {
            self.emit(event);
        }
        self.emit(StagingEvent::Links(state.clone()));
        state
    }

    async fn load_links(&self, id: &EntityId) -> SyncResult<Vec<EntityLinkResult>> {
        let links = self.inner.primary.links_of(id).await?;
        match &self.inner.fallback {
            Some(fallback) if links.is_empty() => fallback.links_of(id).await,
            _ => Ok(links),
        }
    }

    /// Reads a file. When the primary knows an active file but lacks its
    /// bytes, or has never seen it, the fallback is asked and the bytes are
    /// written through into the primary before they are surfaced.
    pub async fn fetch_file(&self, name: &str) -> FileState {
        let started = self.state().tick();
        let loaded = match self.load_file(name).await {
            Ok(state) => state,
            Err(e) => {
                warn!("Fetch of file {} failed: {}", name, e);
                DataWrapper::Failure {
                    id: name.to_string(),
                    message: e.to_string(),
                }
            }
        };

        let key = Key::File(name.to_string());
        {
            let mut st = self.state();
            st.in_flight.remove(&key);
            if st.written_since(&key, started) {
                debug!("Dropping fetched file {} behind a local write", name);
                return st
                    .files
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| DataWrapper::missing(name.to_string()));
            }
            st.files.insert(name.to_string(), loaded.clone());
        }
        self.emit(StagingEvent::File(loaded.clone()));
        loaded
    }

    async fn load_file(&self, name: &str) -> SyncResult<FileState> {
        let primary = self.inner.primary.as_ref();
        let mut index = primary.file_index(name).await?;
        if let Some(found) = &index {
            if !found.status.is_active() {
                return Ok(DataWrapper::Deleted {
                    id: name.to_string(),
                    version: found.version,
                });
            }
            if let Some(data) = primary.read_file(name).await? {
                return Ok(DataWrapper::Active {
                    id: name.to_string(),
                    data,
                    version: found.version,
                });
            }
        }

        let Some(fallback) = &self.inner.fallback else {
            return match index {
                None => Ok(DataWrapper::missing(name.to_string())),
                Some(_) => Err(SyncError::NotFound(format!("file {name}"))),
            };
        };
        if index.is_none() {
            index = fallback.file_index(name).await?;
        }
        let Some(found) = index else {
            return Ok(DataWrapper::missing(name.to_string()));
        };
        if !found.status.is_active() {
            return Ok(DataWrapper::Deleted {
                id: name.to_string(),
                version: found.version,
            });
        }
        let Some(data) = fallback.read_file(name).await? else {
            return Err(SyncError::NotFound(format!(
                "file {name} in primary or fallback"
            )));
        };

        primary.put_file(name, found.version, data.clone()).await?;
        primary.commit().await?;
        debug!("Cached file {} from fallback", name);
        Ok(DataWrapper::Active {
            id: name.to_string(),
            data,
            version: found.version,
        })
    }

    /// Loads the primary's full index into memory so the snapshot covers
    /// every key. Keys that are already settled, or written locally during
    /// the load, are left alone. Active links touching a local tombstone at
    /// or after their version load as deleted. Every loaded entity's link
    /// set counts as loaded afterwards.
    pub async fn hydrate(&self) -> SyncResult<usize> {
        let started = self.state().tick();
        let index: StoreState = self.inner.primary.read_store_state().await?;
        let mut loaded = 0;

        for entry in &index.entities {
            if self.is_settled(&Key::Entity(entry.id.clone())) {
                continue;
            }
            let state = self.load_entity(&entry.id).await?;
            self.settle_entity(started, state);
            loaded += 1;
        }

        for entry in &index.files {
            if self.is_settled(&Key::File(entry.name.clone())) {
                continue;
            }
            self.fetch_file(&entry.name).await;
            loaded += 1;
        }

        for link in &index.links {
            let payload = match link.status {
                ItemStatus::Active => self
                    .inner
                    .primary
                    .link_payload(&link.pair)
                    .await?
                    .unwrap_or(Value::Null),
                ItemStatus::Deleted => Value::Null,
            };
            let mut st = self.state();
            if st.written_since(&Key::Link(link.pair.clone()), started)
                || st.links.get(&link.pair).is_some_and(|e| e.version >= link.version)
            {
                continue;
            }
            let endpoint_deleted = [&link.pair.left, &link.pair.right]
                .into_iter()
                .filter_map(|end| st.tombstone_version(&end.entity_id()))
                .filter(|&version| version >= link.version)
                .max();
            let entry = match (link.status, endpoint_deleted) {
                (ItemStatus::Active, Some(version)) => tombstone(version),
                (status, _) => LinkEntry {
                    status,
                    version: link.version,
                    payload,
                },
            };
            st.links.insert(link.pair.clone(), entry);
            loaded += 1;
        }

        {
            let mut st = self.state();
            for entry in &index.entities {
                st.link_loads.insert(entry.id.clone(), LinkLoad::Loaded);
            }
        }
        info!("Hydrated {} keys from the primary store", loaded);
        Ok(loaded)
    }

    fn is_settled(&self, key: &Key) -> bool {
        let st = self.state();
        match key {
            Key::Entity(id) => st
                .entities
                .get(id)
                .is_some_and(|s| !s.is_pending() && !s.is_failure()),
            Key::File(name) => st
                .files
                .get(name)
                .is_some_and(|s| !s.is_pending() && !s.is_failure()),
            Key::Link(pair) => st.links.contains_key(pair),
            Key::Links(id) => matches!(st.link_loads.get(id), Some(LinkLoad::Loaded)),
        }
    }
}
