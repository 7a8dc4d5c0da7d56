//! In-memory maps behind the staging store.

use lorebook_types::{
    DataWrapper, EntityId, EntityIndex, EntityLink, EntityLinkPair, EntityLinkResult, FileIndex,
    ItemStatus, NO_VERSION, StoreState, Version,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Addresses one tracked value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Key {
    Entity(EntityId),
    File(String),
    Link(EntityLinkPair),
    /// The link set of one entity.
    Links(EntityId),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LinkEntry {
    pub status: ItemStatus,
    pub version: Version,
    pub payload: Value,
}

/// Load state of an entity's link set.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LinkLoad {
    Pending,
    Loaded,
    Failure(String),
}

#[derive(Debug, Default)]
pub(crate) struct StagingState {
    pub entities: BTreeMap<EntityId, DataWrapper<Value, EntityId>>,
    pub files: BTreeMap<String, DataWrapper<Vec<u8>, String>>,
    pub links: BTreeMap<EntityLinkPair, LinkEntry>,
    pub link_loads: HashMap<EntityId, LinkLoad>,
    /// Implicit fetches currently running.
    pub in_flight: HashSet<Key>,
    /// Keys changed locally and not yet flushed.
    pub dirty: HashSet<Key>,
    /// Tick of the last local write per key.
    marks: HashMap<Key, u64>,
    clock: u64,
}

impl StagingState {
    /// Current tick. A fetch records it when it starts.
    pub fn tick(&self) -> u64 {
        self.clock
    }

    /// Records a local write of `key`.
    pub fn mark_local(&mut self, key: Key) {
        self.clock += 1;
        self.marks.insert(key.clone(), self.clock);
        self.dirty.insert(key);
    }

    /// True if `key` was written locally after `since`.
    pub fn written_since(&self, key: &Key, since: u64) -> bool {
        self.marks.get(key).is_some_and(|&mark| mark > since)
    }

    /// Active links touching `id`, oriented from its side.
    pub fn links_from(&self, id: &EntityId) -> Vec<EntityLinkResult> {
        self.links
            .iter()
            .filter(|(_, entry)| entry.status.is_active())
            .filter_map(|(pair, entry)| {
                EntityLinkResult::from_pair(pair, id, entry.payload.clone(), entry.version)
            })
            .collect()
    }

    /// Deleted version of `id` if it is a known tombstone.
    pub fn tombstone_version(&self, id: &EntityId) -> Option<Version> {
        match self.entities.get(id) {
            Some(DataWrapper::Deleted { version, .. }) if *version != NO_VERSION => Some(*version),
            _ => None,
        }
    }

    /// Index snapshot of every settled key.
    pub fn snapshot(&self) -> StoreState {
        let entities = self
            .entities
            .iter()
            .filter_map(|(id, state)| match state {
                DataWrapper::Active { version, .. } => Some(EntityIndex::active(id.clone(), *version)),
                DataWrapper::Deleted { version, .. } if *version != NO_VERSION => {
                    Some(EntityIndex::deleted(id.clone(), *version))
                }
                _ => None,
            })
            .collect();

        let files = self
            .files
            .iter()
            .filter_map(|(name, state)| match state {
                DataWrapper::Active { version, .. } => Some(FileIndex::active(name.clone(), *version)),
                DataWrapper::Deleted { version, .. } if *version != NO_VERSION => {
                    Some(FileIndex::deleted(name.clone(), *version))
                }
                _ => None,
            })
            .collect();

        let links = self
            .links
            .iter()
            .map(|(pair, entry)| EntityLink {
                pair: pair.clone(),
                status: entry.status,
                version: entry.version,
            })
            .collect();

        StoreState {
            entities,
            files,
            links,
        }
    }
}
