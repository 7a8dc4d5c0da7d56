//! Identifier types used throughout the Lorebook core.
//!
//! Entities are addressed by a collection name ("type") plus a per-collection
//! id. Relation endpoints add a reference name describing the endpoint's role,
//! and pairs of endpoints are always stored in canonical order.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifies one record within one logical collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    /// Collection name (e.g. "character", "artwork").
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Id within the collection.
    pub id: String,
}

impl EntityId {
    /// Creates an entity id from its parts.
    #[must_use]
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Creates a fresh id in the given collection.
    /// Uses UUID v7 so generated ids sort by creation time.
    #[must_use]
    pub fn generate(entity_type: impl Into<String>) -> Self {
        Self::new(entity_type, Uuid::now_v7().to_string())
    }

    /// Returns the collection name.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Returns the id within the collection.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.id)
    }
}

impl FromStr for EntityId {
    type Err = crate::Error;

    /// Parses the `type/id` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((t, id)) if !t.is_empty() && !id.is_empty() => Ok(Self::new(t, id)),
            _ => Err(crate::Error::InvalidId(s.to_string())),
        }
    }
}

/// One endpoint's role in a relation.
///
/// `reference_name` distinguishes the directions of a relation between two
/// collections, e.g. "character plays in artwork" vs. "artwork has character".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityLinkReference {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: String,
    #[serde(rename = "referenceName")]
    pub reference_name: String,
}

impl EntityLinkReference {
    fn encoded(&self) -> String {
        format!(
            "{}/{}#{}",
            urlencoding::encode(&self.entity_type),
            urlencoding::encode(&self.id),
            urlencoding::encode(&self.reference_name)
        )
    }

    #[must_use]
    pub fn new(
        entity_type: impl Into<String>,
        id: impl Into<String>,
        reference_name: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
            reference_name: reference_name.into(),
        }
    }

    /// Returns the entity this endpoint points at.
    #[must_use]
    pub fn entity_id(&self) -> EntityId {
        EntityId::new(self.entity_type.clone(), self.id.clone())
    }

    /// Returns true if this endpoint points at `entity`.
    #[must_use]
    pub fn refers_to(&self, entity: &EntityId) -> bool {
        self.entity_type == entity.entity_type && self.id == entity.id
    }
}

/// Canonical ordering: type, then reference name, then id.
impl Ord for EntityLinkReference {
    fn cmp(&self, other: &Self) -> Ordering {
        self.entity_type
            .cmp(&other.entity_type)
            .then_with(|| self.reference_name.cmp(&other.reference_name))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for EntityLinkReference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for EntityLinkReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.entity_type, self.id, self.reference_name)
    }
}

/// A relation between two endpoints, normalized so that `left <= right`.
///
/// The same relation observed from either endpoint always produces the same
/// pair, so pairs can be used directly as storage and diff keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityLinkPair {
    pub left: EntityLinkReference,
    pub right: EntityLinkReference,
}

impl EntityLinkPair {
    /// Builds the canonical pair for two endpoints given in any order.
    #[must_use]
    pub fn new(a: EntityLinkReference, b: EntityLinkReference) -> Self {
        if a <= b {
            Self { left: a, right: b }
        } else {
            Self { left: b, right: a }
        }
    }

    /// Stable string key for this pair. Each component is percent-encoded,
    /// so separators inside ids never collide with the `/`, `#` and `|`
    /// delimiters.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}|{}", self.left.encoded(), self.right.encoded())
    }

    /// Returns true if either endpoint points at `entity`.
    #[must_use]
    pub fn touches(&self, entity: &EntityId) -> bool {
        self.left.refers_to(entity) || self.right.refers_to(entity)
    }

    /// Returns `(self_ref, opposite)` as seen from `entity`, or `None` if the
    /// pair does not touch it. A self-relation resolves to the left endpoint.
    #[must_use]
    pub fn oriented_from(
        &self,
        entity: &EntityId,
    ) -> Option<(&EntityLinkReference, &EntityLinkReference)> {
        if self.left.refers_to(entity) {
            Some((&self.left, &self.right))
        } else if self.right.refers_to(entity) {
            Some((&self.right, &self.left))
        } else {
            None
        }
    }
}

impl fmt::Display for EntityLinkPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.left, self.right)
    }
}
