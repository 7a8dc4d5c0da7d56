//! Index records for entities, files and links.
//!
//! An index entry carries identity, lifecycle status and version but never the
//! content itself. Content exists iff the status is [`ItemStatus::Active`];
//! a [`ItemStatus::Deleted`] entry is a tombstone retaining only id + version.

use crate::{EntityId, EntityLinkPair, EntityLinkReference, Version};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle status shared by entities, files and links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Active,
    Deleted,
}

impl ItemStatus {
    /// Returns the lowercase name used in storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }

    /// Parses the storage name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Index entry for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityIndex {
    #[serde(flatten)]
    pub id: EntityId,
    pub status: ItemStatus,
    pub version: Version,
}

impl EntityIndex {
    #[must_use]
    pub fn active(id: EntityId, version: Version) -> Self {
        Self {
            id,
            status: ItemStatus::Active,
            version,
        }
    }

    #[must_use]
    pub fn deleted(id: EntityId, version: Version) -> Self {
        Self {
            id,
            status: ItemStatus::Deleted,
            version,
        }
    }
}

/// Index entry for one file blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIndex {
    pub name: String,
    pub status: ItemStatus,
    pub version: Version,
}

impl FileIndex {
    #[must_use]
    pub fn active(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            status: ItemStatus::Active,
            version,
        }
    }

    #[must_use]
    pub fn deleted(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            status: ItemStatus::Deleted,
            version,
        }
    }
}

/// Index entry for one relation instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityLink {
    #[serde(flatten)]
    pub pair: EntityLinkPair,
    pub status: ItemStatus,
    pub version: Version,
}

impl EntityLink {
    #[must_use]
    pub fn active(pair: EntityLinkPair, version: Version) -> Self {
        Self {
            pair,
            status: ItemStatus::Active,
            version,
        }
    }

    #[must_use]
    pub fn deleted(pair: EntityLinkPair, version: Version) -> Self {
        Self {
            pair,
            status: ItemStatus::Deleted,
            version,
        }
    }
}

/// A link as observed from one of its endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityLinkResult {
    /// The endpoint the observation was made from.
    #[serde(rename = "self")]
    pub self_ref: EntityLinkReference,
    /// The other endpoint.
    pub opposite: EntityLinkReference,
    /// Relation payload (e.g. role or credit notes).
    pub payload: serde_json::Value,
    pub version: Version,
}

impl EntityLinkResult {
    /// Canonical pair for this observation, independent of direction.
    #[must_use]
    pub fn pair(&self) -> EntityLinkPair {
        EntityLinkPair::new(self.self_ref.clone(), self.opposite.clone())
    }

    /// Re-orients a canonical pair from `entity`'s perspective.
    #[must_use]
    pub fn from_pair(
        pair: &EntityLinkPair,
        entity: &EntityId,
        payload: serde_json::Value,
        version: Version,
    ) -> Option<Self> {
        let (self_ref, opposite) = pair.oriented_from(entity)?;
        Some(Self {
            self_ref: self_ref.clone(),
            opposite: opposite.clone(),
            payload,
            version,
        })
    }
}

/// Full index snapshot of a store, the unit compared during reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    pub entities: Vec<EntityIndex>,
    #[serde(default)]
    pub files: Vec<FileIndex>,
    #[serde(default)]
    pub links: Vec<EntityLink>,
}

impl StoreState {
    /// Returns true if the snapshot holds no index entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.files.is_empty() && self.links.is_empty()
    }

    /// Linear lookup, for one-off checks. Use [`StoreIndex`] for repeated
    /// access.
    pub fn entity(&self, id: &EntityId) -> Option<&EntityIndex> {
        self.entities.iter().find(|e| &e.id == id)
    }

    pub fn file(&self, name: &str) -> Option<&FileIndex> {
        self.files.iter().find(|f| f.name == name)
    }

    pub fn link(&self, pair: &EntityLinkPair) -> Option<&EntityLink> {
        self.links.iter().find(|l| &l.pair == pair)
    }
}

/// Keyed form of a [`StoreState`] for stores that update their index
/// entry by entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreIndex {
    entities: BTreeMap<EntityId, EntityIndex>,
    files: BTreeMap<String, FileIndex>,
    links: BTreeMap<EntityLinkPair, EntityLink>,
}

impl StoreIndex {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.files.is_empty() && self.links.is_empty()
    }

    /// Inserts or replaces the entry for `index.id`.
    pub fn upsert_entity(&mut self, index: EntityIndex) {
        self.entities.insert(index.id.clone(), index);
    }

    /// Inserts or replaces the entry for `index.name`.
    pub fn upsert_file(&mut self, index: FileIndex) {
        self.files.insert(index.name.clone(), index);
    }

    /// Inserts or replaces the entry for `link.pair`.
    pub fn upsert_link(&mut self, link: EntityLink) {
        self.links.insert(link.pair.clone(), link);
    }

    pub fn entity(&self, id: &EntityId) -> Option<&EntityIndex> {
        self.entities.get(id)
    }

    pub fn file(&self, name: &str) -> Option<&FileIndex> {
        self.files.get(name)
    }

    pub fn link(&self, pair: &EntityLinkPair) -> Option<&EntityLink> {
        self.links.get(pair)
    }

    pub fn links(&self) -> impl Iterator<Item = &EntityLink> {
        self.links.values()
    }

    /// Snapshot with every section sorted by key.
    #[must_use]
    pub fn to_state(&self) -> StoreState {
        StoreState {
            entities: self.entities.values().cloned().collect(),
            files: self.files.values().cloned().collect(),
            links: self.links.values().cloned().collect(),
        }
    }
}

/// Later duplicates of a key replace earlier ones.
impl From<StoreState> for StoreIndex {
    fn from(state: StoreState) -> Self {
        let mut index = Self::default();
        for entry in state.entities {
            index.upsert_entity(entry);
        }
        for entry in state.files {
            index.upsert_file(entry);
        }
        for link in state.links {
            index.upsert_link(link);
        }
        index
    }
}
