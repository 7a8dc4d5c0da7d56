//! Query store: the local durable cache of entities and their derived indices.
//!
//! Entity content is stored as JSON keyed by `(type, id)`. Writing an entity
//! rebuilds every tag and full-text posting attributed to it in the same
//! transaction, so no posting from a previous version survives the write.

use crate::error::{StorageError, StorageResult};
use crate::schema::initialize_schema;
use duckdb::{params, Connection, Transaction};
use lorebook_types::{
    EntityId, EntityIndex, FileIndex, ItemStatus, StoreState, Version,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// A tag membership derived from entity content, e.g. `("tags", "villain")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagPosting {
    pub property: String,
    pub value: String,
}

impl TagPosting {
    pub fn new(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            value: value.into(),
        }
    }
}

/// One full-text token, keyed by its n-gram size.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FullTextTerm {
    pub n_gram: u32,
    pub token: String,
}

/// A full-text hit. `score` counts the distinct query terms the entity matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredMatch {
    pub id: EntityId,
    pub score: u32,
}

/// Local durable cache backed by DuckDB.
#[derive(Clone)]
pub struct QueryStore {
    conn: Arc<Mutex<Connection>>,
}

impl QueryStore {
    /// Opens or creates a query store at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = crate::open_duckdb_with_wal_recovery(path, "256MB", 2)?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory query store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Locks the shared connection for one logical operation.
    pub(crate) fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Unavailable("connection lock poisoned".to_string()))
    }

    // ── Entities ─────────────────────────────────────────────────

    /// Returns the index entry (including tombstones) for an entity.
    pub fn get_entity_index(&self, id: &EntityId) -> StorageResult<Option<EntityIndex>> {
        let conn = self.lock()?;
        entity_index_in(&conn, id)
    }

    /// Returns the content of an active entity, `None` for missing or deleted.
    pub fn get_entity_content(&self, id: &EntityId) -> StorageResult<Option<serde_json::Value>> {
        let conn = self.lock()?;
        let result = conn.query_row(
            "SELECT content FROM entities WHERE entity_type = ? AND entity_id = ? AND status = 'active'",
            params![id.entity_type, id.id],
            |row| row.get::<_, Option<String>>(0),
        );
        match result {
            Ok(Some(raw)) => Ok(Some(serde_json::from_str(&raw)?)),
            Ok(None) => Ok(None),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Point read that fails when the entity is missing or deleted.
    pub fn get_entity(&self, id: &EntityId) -> StorageResult<serde_json::Value> {
        self.get_entity_content(id)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    /// Writes entity content and rebuilds its postings atomically.
    pub fn put_entity(
        &self,
        id: &EntityId,
        version: Version,
        content: &serde_json::Value,
        properties: &[TagPosting],
        full_text_terms: &[FullTextTerm],
    ) -> StorageResult<()> {
        let raw = serde_json::to_string(content)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        ensure_not_stale(&tx, id, version)?;

        tx.execute(
            "INSERT OR REPLACE INTO entities (entity_type, entity_id, status, version, content) VALUES (?, ?, 'active', ?, ?)",
            params![id.entity_type, id.id, version, raw],
        )?;
        remove_postings(&tx, id)?;

        let unique_tags: BTreeSet<&TagPosting> = properties.iter().collect();
        for tag in unique_tags {
            tx.execute(
                "INSERT INTO entity_tags (property, value, entity_type, entity_id) VALUES (?, ?, ?, ?)",
                params![tag.property, tag.value, id.entity_type, id.id],
            )?;
        }
        let unique_terms: BTreeSet<&FullTextTerm> = full_text_terms.iter().collect();
        for term in unique_terms {
            tx.execute(
                "INSERT INTO entity_terms (n_gram, token, entity_type, entity_id) VALUES (?, ?, ?, ?)",
                params![term.n_gram as i64, term.token, id.entity_type, id.id],
            )?;
        }

        tx.commit()?;
        debug!("Stored entity {} at version {}", id, version);
        Ok(())
    }

    /// Removes content and postings, leaving a tombstone with `version`.
    pub fn delete_entity(&self, id: &EntityId, version: Version) -> StorageResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        ensure_not_stale(&tx, id, version)?;

        tx.execute(
            "INSERT OR REPLACE INTO entities (entity_type, entity_id, status, version, content) VALUES (?, ?, 'deleted', ?, NULL)",
            params![id.entity_type, id.id, version],
        )?;
        remove_postings(&tx, id)?;

        tx.commit()?;
        debug!("Tombstoned entity {} at version {}", id, version);
        Ok(())
    }

    /// Lists active entity ids of one collection.
    pub fn list_entities(&self, entity_type: &str) -> StorageResult<Vec<EntityId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT entity_type, entity_id FROM entities WHERE entity_type = ? AND status = 'active' ORDER BY entity_id",
        )?;
        let ids = stmt
            .query_map(params![entity_type], |row| {
                Ok(EntityId::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Count active entities of a given type.
    pub fn count_entities(&self, entity_type: &str) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE entity_type = ? AND status = 'active'",
            params![entity_type],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ── Derived-index queries ────────────────────────────────────

    /// Entities whose `property` tag collection contains `value`.
    pub fn query_by_tag(&self, property: &str, value: &str) -> StorageResult<Vec<EntityId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT entity_type, entity_id FROM entity_tags WHERE property = ? AND value = ? ORDER BY entity_type, entity_id",
        )?;
        let ids = stmt
            .query_map(params![property, value], |row| {
                Ok(EntityId::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Entities matching any of `terms`, best first.
    ///
    /// The score is the number of distinct query terms an entity matched, so
    /// it grows with term overlap. Ties are broken by id.
    pub fn query_by_full_text(&self, terms: &[FullTextTerm]) -> StorageResult<Vec<ScoredMatch>> {
        let unique: BTreeSet<&FullTextTerm> = terms.iter().collect();
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT entity_type, entity_id FROM entity_terms WHERE n_gram = ? AND token = ?",
        )?;

        let mut scores: HashMap<EntityId, u32> = HashMap::new();
        for term in unique {
            let hits = stmt
                .query_map(params![term.n_gram as i64, term.token], |row| {
                    Ok(EntityId::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            for id in hits {
                *scores.entry(id).or_insert(0) += 1;
            }
        }

        let mut matches: Vec<ScoredMatch> = scores
            .into_iter()
            .map(|(id, score)| ScoredMatch { id, score })
            .collect();
        matches.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        Ok(matches)
    }

    // ── Snapshot ─────────────────────────────────────────────────

    /// Reads every entity, file and link index entry, tombstones included.
    pub fn read_store_state(&self) -> StorageResult<StoreState> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT entity_type, entity_id, status, version FROM entities ORDER BY entity_type, entity_id",
        )?;
        let entities = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(t, id, status, version)| {
                Ok(EntityIndex {
                    id: EntityId::new(t, id),
                    status: parse_status(&status)?,
                    version,
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;
        drop(stmt);

        let mut stmt = conn.prepare("SELECT name, status, version FROM files ORDER BY name")?;
        let files = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(name, status, version)| {
                Ok(FileIndex {
                    name,
                    status: parse_status(&status)?,
                    version,
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;
        drop(stmt);

        let links = crate::links::all_links_in(&conn)?;

        Ok(StoreState {
            entities,
            files,
            links,
        })
    }
}

pub(crate) fn parse_status(raw: &str) -> StorageResult<ItemStatus> {
    ItemStatus::parse(raw).ok_or_else(|| StorageError::InvalidData(format!("unknown status '{raw}'")))
}

fn entity_index_in(conn: &Connection, id: &EntityId) -> StorageResult<Option<EntityIndex>> {
    let result = conn.query_row(
        "SELECT status, version FROM entities WHERE entity_type = ? AND entity_id = ?",
        params![id.entity_type, id.id],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
    );
    match result {
        Ok((status, version)) => Ok(Some(EntityIndex {
            id: id.clone(),
            status: parse_status(&status)?,
            version,
        })),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Versions never decrease for a key.
fn ensure_not_stale(tx: &Transaction<'_>, id: &EntityId, version: Version) -> StorageResult<()> {
    if let Some(existing) = entity_index_in(tx, id)? {
        if existing.version > version {
            return Err(StorageError::StaleVersion {
                key: id.to_string(),
                stored: existing.version,
                attempted: version,
            });
        }
    }
    Ok(())
}

fn remove_postings(tx: &Transaction<'_>, id: &EntityId) -> StorageResult<()> {
    tx.execute(
        "DELETE FROM entity_tags WHERE entity_type = ? AND entity_id = ?",
        params![id.entity_type, id.id],
    )?;
    tx.execute(
        "DELETE FROM entity_terms WHERE entity_type = ? AND entity_id = ?",
        params![id.entity_type, id.id],
    )?;
    Ok(())
}
