//! Store contracts over the staging store, and flushing to the primary.
//!
//! As a reader the staging store answers from memory and asks the primary
//! for anything it has not settled. As a writer it stages changes in memory
//! and `commit` flushes them.

use crate::state::{Key, LinkEntry, LinkLoad};
use crate::store::{StagingStore, tombstone};
use async_trait::async_trait;
use lorebook_sync::{StoreReader, StoreWriter, SyncError, SyncResult};
use lorebook_types::{
    DataWrapper, EntityId, EntityIndex, EntityLinkPair, EntityLinkResult, FileIndex, ItemStatus,
    NO_VERSION, StoreState, Version,
};
use serde_json::Value;
use tracing::{debug, info};

/// A staged change waiting to be written to the primary.
enum Flush {
    PutFile(String, Version, Vec<u8>),
    PutEntity(EntityId, Version, Value),
    PutLink(EntityLinkPair, Version, Value),
    DeleteLink(EntityLinkPair, Version),
    DeleteEntity(EntityId, Version),
    DeleteFile(String, Version),
}

impl Flush {
    /// Same order the reconciliation engine applies actions in.
    fn rank(&self) -> u8 {
        match self {
            Flush::PutFile(..) => 0,
            Flush::PutEntity(..) => 1,
            Flush::PutLink(..) => 2,
            Flush::DeleteLink(..) => 3,
            Flush::DeleteEntity(..) => 4,
            Flush::DeleteFile(..) => 5,
        }
    }
}

impl StagingStore {
    /// Writes every locally changed key to the primary store and commits.
    /// Returns the number of changes written.
    ///
    /// Keys written again while the flush runs stay dirty for the next one.
    pub async fn flush(&self) -> SyncResult<usize> {
        self.cascade_deleted_links().await?;
        let (started, mut work) = {
            let st = self.state();
            let work: Vec<(Key, Flush)> = st
                .dirty
                .iter()
                .filter_map(|key| {
                    let change = match key {
                        Key::Entity(id) => match st.entities.get(id)? {
                            DataWrapper::Active { data, version, .. } => {
                                Flush::PutEntity(id.clone(), *version, data.clone())
                            }
                            DataWrapper::Deleted { version, .. } => {
                                Flush::DeleteEntity(id.clone(), *version)
                            }
                            _ => return None,
                        },
                        Key::File(name) => match st.files.get(name)? {
                            DataWrapper::Active { data, version, .. } => {
                                Flush::PutFile(name.clone(), *version, data.clone())
                            }
                            DataWrapper::Deleted { version, .. } => {
                                Flush::DeleteFile(name.clone(), *version)
                            }
                            _ => return None,
                        },
                        Key::Link(pair) => {
                            let entry = st.links.get(pair)?;
                            match entry.status {
                                ItemStatus::Active => Flush::PutLink(
                                    pair.clone(),
                                    entry.version,
                                    entry.payload.clone(),
                                ),
                                ItemStatus::Deleted => Flush::DeleteLink(pair.clone(), entry.version),
                            }
                        }
                        Key::Links(_) => return None,
                    };
                    Some((key.clone(), change))
                })
                .collect();
            (st.tick(), work)
        };
        work.sort_by_key(|(_, change)| change.rank());

        let primary = self.inner.primary.as_ref();
        for (_, change) in &work {
            match change {
                Flush::PutFile(name, version, data) => {
                    primary.put_file(name, *version, data.clone()).await?
                }
                Flush::PutEntity(id, version, data) => {
                    primary.put_entity(id, *version, data.clone()).await?
                }
                Flush::PutLink(pair, version, payload) => {
                    primary.put_link(pair, *version, payload.clone()).await?
                }
                Flush::DeleteLink(pair, version) => primary.delete_link(pair, *version).await?,
                Flush::DeleteEntity(id, version) => primary.delete_entity(id, *version).await?,
                Flush::DeleteFile(name, version) => primary.delete_file(name, *version).await?,
            }
        }
        primary.commit().await?;

        let mut st = self.state();
        for (key, _) in &work {
            if !st.written_since(key, started) {
                st.dirty.remove(key);
            }
        }
        if !work.is_empty() {
            info!("Flushed {} staged changes", work.len());
        }
        Ok(work.len())
    }

    /// Tombstones the primary's active links of every staged entity
    /// deletion, including links never loaded into memory. A link the
    /// primary holds at a newer version than the deletion survives, and so
    /// does one with a pending local change.
    async fn cascade_deleted_links(&self) -> SyncResult<()> {
        let deleted: Vec<(EntityId, Version)> = {
            let st = self.state();
            st.dirty
                .iter()
                .filter_map(|key| match key {
                    Key::Entity(id) => st.tombstone_version(id).map(|v| (id.clone(), v)),
                    _ => None,
                })
                .collect()
        };

        let mut cascaded = 0;
        for (id, version) in deleted {
            for result in self.inner.primary.links_of(&id).await? {
                if result.version > version {
                    continue;
                }
                let pair = result.pair();
                let skip = {
                    let st = self.state();
                    st.dirty.contains(&Key::Link(pair.clone()))
                        || st.links.get(&pair).is_some_and(|e| e.version > version)
                };
                if !skip {
                    self.set_link(pair, tombstone(version));
                    cascaded += 1;
                }
            }
        }
        if cascaded > 0 {
            debug!("Cascaded {} link deletions from the primary store", cascaded);
        }
        Ok(())
    }
}

#[async_trait]
impl StoreReader for StagingStore {
    async fn read_store_state(&self) -> SyncResult<StoreState> {
        Ok(StagingStore::read_store_state(self))
    }

    async fn entity_index(&self, id: &EntityId) -> SyncResult<Option<EntityIndex>> {
        let local = match self.state().entities.get(id) {
            Some(DataWrapper::Active { version, .. }) => {
                Some(Some(EntityIndex::active(id.clone(), *version)))
            }
            Some(DataWrapper::Deleted { version, .. }) if *version == NO_VERSION => Some(None),
            Some(DataWrapper::Deleted { version, .. }) => {
                Some(Some(EntityIndex::deleted(id.clone(), *version)))
            }
            _ => None,
        };
        match local {
            Some(index) => Ok(index),
            None => self.inner.primary.entity_index(id).await,
        }
    }

    async fn entity_content(&self, id: &EntityId) -> SyncResult<Option<Value>> {
        let local = match self.state().entities.get(id) {
            Some(DataWrapper::Active { data, .. }) => Some(Some(data.clone())),
            Some(DataWrapper::Deleted { .. }) => Some(None),
            _ => None,
        };
        match local {
            Some(content) => Ok(content),
            None => self.inner.primary.entity_content(id).await,
        }
    }

    async fn links_of(&self, id: &EntityId) -> SyncResult<Vec<EntityLinkResult>> {
        let loaded = matches!(self.state().link_loads.get(id), Some(LinkLoad::Loaded));
        let state = if loaded {
            StagingStore::links_of(self, id)
        } else {
            self.fetch_links(id).await
        };
        match state {
            DataWrapper::Active { data, .. } => Ok(data),
            DataWrapper::Failure { message, .. } => Err(SyncError::NotFound(format!(
                "links of {id}: {message}"
            ))),
            DataWrapper::Pending { .. } | DataWrapper::Deleted { .. } => Ok(Vec::new()),
        }
    }

    async fn link_payload(&self, pair: &EntityLinkPair) -> SyncResult<Option<Value>> {
        let local = self.state().links.get(pair).map(|entry| match entry.status {
            ItemStatus::Active => Some(entry.payload.clone()),
            ItemStatus::Deleted => None,
        });
        match local {
            Some(payload) => Ok(payload),
            None => self.inner.primary.link_payload(pair).await,
        }
    }

    async fn file_index(&self, name: &str) -> SyncResult<Option<FileIndex>> {
        let local = match self.state().files.get(name) {
            Some(DataWrapper::Active { version, .. }) => Some(Some(FileIndex::active(name, *version))),
            Some(DataWrapper::Deleted { version, .. }) if *version == NO_VERSION => Some(None),
            Some(DataWrapper::Deleted { version, .. }) => {
                Some(Some(FileIndex::deleted(name, *version)))
            }
            _ => None,
        };
        match local {
            Some(index) => Ok(index),
            None => self.inner.primary.file_index(name).await,
        }
    }

    async fn read_file(&self, name: &str) -> SyncResult<Option<Vec<u8>>> {
        let local = match self.state().files.get(name) {
            Some(DataWrapper::Active { data, .. }) => Some(Some(data.clone())),
            Some(DataWrapper::Deleted { .. }) => Some(None),
            _ => None,
        };
        match local {
            Some(content) => Ok(content),
            None => self.inner.primary.read_file(name).await,
        }
    }
}

#[async_trait]
impl StoreWriter for StagingStore {
    async fn put_entity(&self, id: &EntityId, version: Version, content: Value) -> SyncResult<()> {
        StagingStore::put_entity(self, id, version, content);
        Ok(())
    }

    async fn delete_entity(&self, id: &EntityId, version: Version) -> SyncResult<()> {
        StagingStore::delete_entity(self, id, version);
        Ok(())
    }

    async fn put_file(&self, name: &str, version: Version, content: Vec<u8>) -> SyncResult<()> {
        StagingStore::put_file(self, name, version, content);
        Ok(())
    }

    async fn delete_file(&self, name: &str, version: Version) -> SyncResult<()> {
        StagingStore::delete_file(self, name, version);
        Ok(())
    }

    async fn put_link(
        &self,
        pair: &EntityLinkPair,
        version: Version,
        payload: Value,
    ) -> SyncResult<()> {
        self.set_link(
            EntityLinkPair::new(pair.left.clone(), pair.right.clone()),
            LinkEntry {
                status: ItemStatus::Active,
                version,
                payload,
            },
        );
        Ok(())
    }

    async fn delete_link(&self, pair: &EntityLinkPair, version: Version) -> SyncResult<()> {
        StagingStore::delete_link(self, pair, version);
        Ok(())
    }

    /// Flushes staged changes into the primary store.
    async fn commit(&self) -> SyncResult<()> {
        self.flush().await.map(|_| ())
    }
}
