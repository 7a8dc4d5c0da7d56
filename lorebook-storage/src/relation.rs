//! Two-way relation binder.
//!
//! A many-to-many relation is stored as two one-sided pointer sets in a
//! single physical store: the left side key maps left ids to right ids and
//! the right side key maps right ids back to left ids. [`TwoWayRelation`]
//! keeps both halves in step.
//!
//! The two halves are written independently. If one half fails the relation
//! stays half-written and the error is returned to the caller; there is no
//! rollback or write-ahead log. Re-running the same `link_pair` or
//! `unlink_pair` repairs it.

use crate::error::{StorageError, StorageResult};
use crate::query_store::QueryStore;
use async_trait::async_trait;
use duckdb::params;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Which half of a relation a view operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationSide {
    Left,
    Right,
}

impl RelationSide {
    pub fn opposite(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }
}

/// One pointer from a source id to a target id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationTarget {
    pub target_id: String,
    pub payload: serde_json::Value,
    pub updated_at: i64,
}

/// Physical storage for one-sided relation pointers, keyed by side key.
#[async_trait]
pub trait RelationStore: Send + Sync {
    /// Current targets of `source_id` under `side_key`, ordered by target id.
    async fn targets(&self, side_key: &str, source_id: &str) -> StorageResult<Vec<RelationTarget>>;

    /// Inserts or replaces a pointer.
    async fn put_pointer(
        &self,
        side_key: &str,
        source_id: &str,
        target: RelationTarget,
    ) -> StorageResult<()>;

    /// Removes a pointer. Removing an absent pointer is not an error.
    async fn remove_pointer(
        &self,
        side_key: &str,
        source_id: &str,
        target_id: &str,
    ) -> StorageResult<()>;
}

#[async_trait]
impl RelationStore for QueryStore {
    async fn targets(&self, side_key: &str, source_id: &str) -> StorageResult<Vec<RelationTarget>> {
        let store = self.clone();
        let side_key = side_key.to_string();
        let source_id = source_id.to_string();
        tokio::task::spawn_blocking(move || store.relation_targets(&side_key, &source_id))
            .await
            .map_err(|e| StorageError::Unavailable(format!("relation task failed: {e}")))?
    }

    async fn put_pointer(
        &self,
        side_key: &str,
        source_id: &str,
        target: RelationTarget,
    ) -> StorageResult<()> {
        let store = self.clone();
        let side_key = side_key.to_string();
        let source_id = source_id.to_string();
        tokio::task::spawn_blocking(move || {
            store.put_relation_pointer(&side_key, &source_id, &target)
        })
        .await
        .map_err(|e| StorageError::Unavailable(format!("relation task failed: {e}")))?
    }

    async fn remove_pointer(
        &self,
        side_key: &str,
        source_id: &str,
        target_id: &str,
    ) -> StorageResult<()> {
        let store = self.clone();
        let side_key = side_key.to_string();
        let source_id = source_id.to_string();
        let target_id = target_id.to_string();
        tokio::task::spawn_blocking(move || {
            store.remove_relation_pointer(&side_key, &source_id, &target_id)
        })
        .await
        .map_err(|e| StorageError::Unavailable(format!("relation task failed: {e}")))?
    }
}

impl QueryStore {
    fn relation_targets(&self, side_key: &str, source_id: &str) -> StorageResult<Vec<RelationTarget>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT target_id, payload, updated_at FROM relation_pointers \
             WHERE side = ? AND source_id = ? ORDER BY target_id",
        )?;
        let rows = stmt
            .query_map(params![side_key, source_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(target_id, payload, updated_at)| {
                Ok(RelationTarget {
                    target_id,
                    payload: serde_json::from_str(&payload)?,
                    updated_at,
                })
            })
            .collect()
    }

    fn put_relation_pointer(
        &self,
        side_key: &str,
        source_id: &str,
        target: &RelationTarget,
    ) -> StorageResult<()> {
        let payload = serde_json::to_string(&target.payload)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO relation_pointers (side, source_id, target_id, payload, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
            params![side_key, source_id, target.target_id, payload, target.updated_at],
        )?;
        Ok(())
    }

    fn remove_relation_pointer(
        &self,
        side_key: &str,
        source_id: &str,
        target_id: &str,
    ) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM relation_pointers WHERE side = ? AND source_id = ? AND target_id = ?",
            params![side_key, source_id, target_id],
        )?;
        Ok(())
    }
}

/// A many-to-many relation stored as two pointer sets.
pub struct TwoWayRelation<S: RelationStore> {
    store: Arc<S>,
    left_key: String,
    right_key: String,
}

impl<S: RelationStore> Clone for TwoWayRelation<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            left_key: self.left_key.clone(),
            right_key: self.right_key.clone(),
        }
    }
}

impl<S: RelationStore> TwoWayRelation<S> {
    pub fn new(store: Arc<S>, left_key: impl Into<String>, right_key: impl Into<String>) -> Self {
        Self {
            store,
            left_key: left_key.into(),
            right_key: right_key.into(),
        }
    }

    /// Pointers from left ids to right ids.
    pub fn left(&self) -> RelationView<'_, S> {
        self.side(RelationSide::Left)
    }

    /// Pointers from right ids to left ids.
    pub fn right(&self) -> RelationView<'_, S> {
        self.side(RelationSide::Right)
    }

    pub fn side(&self, side: RelationSide) -> RelationView<'_, S> {
        let key = match side {
            RelationSide::Left => &self.left_key,
            RelationSide::Right => &self.right_key,
        };
        RelationView {
            store: self.store.as_ref(),
            key,
        }
    }

    /// Writes both halves concurrently. Returns the first error; a failed
    /// half is not rolled back.
    pub async fn link_pair(
        &self,
        left_id: &str,
        right_id: &str,
        payload: serde_json::Value,
        updated_at: i64,
    ) -> StorageResult<()> {
        let left = self.left();
        let right = self.right();
        let (forward, reverse) = tokio::join!(
            left.link(left_id, right_id, payload.clone(), updated_at),
            right.link(right_id, left_id, payload, updated_at),
        );
        if forward.is_err() || reverse.is_err() {
            warn!(
                "Relation {}/{} left half-written for {} <-> {}",
                self.left_key, self.right_key, left_id, right_id
            );
        }
        forward?;
        reverse?;
        debug!("Linked {} <-> {}", left_id, right_id);
        Ok(())
    }

    /// Removes both halves concurrently. Returns the first error.
    pub async fn unlink_pair(&self, left_id: &str, right_id: &str) -> StorageResult<()> {
        let left = self.left();
        let right = self.right();
        let (forward, reverse) = tokio::join!(
            left.unlink(left_id, right_id),
            right.unlink(right_id, left_id),
        );
        forward?;
        reverse?;
        debug!("Unlinked {} <-> {}", left_id, right_id);
        Ok(())
    }

    /// Detaches `id` on `side` from every current target. Each target's
    /// reverse pointer goes first, then the forward pointer. Returns the
    /// number of targets unlinked.
    pub async fn unlink_all_targets_by_id(&self, side: RelationSide, id: &str) -> StorageResult<usize> {
        let forward = self.side(side);
        let reverse = self.side(side.opposite());

        let targets = forward.targets_of(id).await?;
        for target in &targets {
            reverse.unlink(&target.target_id, id).await?;
            forward.unlink(id, &target.target_id).await?;
        }
        debug!("Unlinked {} targets of {}", targets.len(), id);
        Ok(targets.len())
    }
}

/// One side of a [`TwoWayRelation`]. Writes through a view touch only that
/// side's pointers.
pub struct RelationView<'a, S: RelationStore> {
    store: &'a S,
    key: &'a str,
}

impl<S: RelationStore> RelationView<'_, S> {
    pub fn key(&self) -> &str {
        self.key
    }

    pub async fn targets_of(&self, id: &str) -> StorageResult<Vec<RelationTarget>> {
        self.store.targets(self.key, id).await
    }

    pub async fn link(
        &self,
        source_id: &str,
        target_id: &str,
        payload: serde_json::Value,
        updated_at: i64,
    ) -> StorageResult<()> {
        let target = RelationTarget {
            target_id: target_id.to_string(),
            payload,
            updated_at,
        };
        self.store.put_pointer(self.key, source_id, target).await
    }

    pub async fn unlink(&self, source_id: &str, target_id: &str) -> StorageResult<()> {
        self.store.remove_pointer(self.key, source_id, target_id).await
    }
}
