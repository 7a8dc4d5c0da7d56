//! Relation links keyed by their canonical endpoint pair.

use crate::error::{StorageError, StorageResult};
use crate::query_store::{QueryStore, parse_status};
use duckdb::{Connection, params};
use lorebook_types::{
    EntityId, EntityLink, EntityLinkPair, EntityLinkReference, EntityLinkResult, Version,
};
use tracing::debug;

const PAIR_COLUMNS: &str = "left_type, left_id, left_ref, right_type, right_id, right_ref";
const PAIR_FILTER: &str = "left_type = ? AND left_id = ? AND left_ref = ? \
                           AND right_type = ? AND right_id = ? AND right_ref = ?";

impl QueryStore {
    /// Returns the index entry (including tombstones) for a link.
    pub fn get_link(&self, pair: &EntityLinkPair) -> StorageResult<Option<EntityLink>> {
        let conn = self.lock()?;
        link_in(&conn, pair)
    }

    /// Returns the payload of an active link.
    pub fn get_link_payload(
        &self,
        pair: &EntityLinkPair,
    ) -> StorageResult<Option<serde_json::Value>> {
        let conn = self.lock()?;
        let sql = format!("SELECT payload FROM links WHERE {PAIR_FILTER} AND status = 'active'");
        let result = conn.query_row(
            &sql,
            params![
                pair.left.entity_type,
                pair.left.id,
                pair.left.reference_name,
                pair.right.entity_type,
                pair.right.id,
                pair.right.reference_name,
            ],
            |row| row.get::<_, Option<String>>(0),
        );
        match result {
            Ok(Some(raw)) => Ok(Some(serde_json::from_str(&raw)?)),
            Ok(None) => Ok(None),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Active links touching `entity`, oriented from its perspective.
    pub fn links_of(&self, entity: &EntityId) -> StorageResult<Vec<EntityLinkResult>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {PAIR_COLUMNS}, version, payload FROM links \
             WHERE status = 'active' \
             AND ((left_type = ? AND left_id = ?) OR (right_type = ? AND right_id = ?)) \
             ORDER BY {PAIR_COLUMNS}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![entity.entity_type, entity.id, entity.entity_type, entity.id],
                |row| {
                    Ok((
                        row_to_pair(row)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, Option<String>>(7)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let mut results = Vec::with_capacity(rows.len());
        for (pair, version, payload) in rows {
            let payload = match payload {
                Some(raw) => serde_json::from_str(&raw)?,
                None => serde_json::Value::Null,
            };
            if let Some(result) = EntityLinkResult::from_pair(&pair, entity, payload, version) {
                results.push(result);
            }
        }
        Ok(results)
    }

    /// Stores an active link at `version`.
    pub fn put_link(
        &self,
        pair: &EntityLinkPair,
        version: Version,
        payload: &serde_json::Value,
    ) -> StorageResult<()> {
        let raw = serde_json::to_string(payload)?;
        let conn = self.lock()?;
        ensure_link_not_stale(&conn, pair, version)?;
        let sql = format!(
            "INSERT OR REPLACE INTO links ({PAIR_COLUMNS}, status, version, payload) \
             VALUES (?, ?, ?, ?, ?, ?, 'active', ?, ?)"
        );
        conn.execute(
            &sql,
            params![
                pair.left.entity_type,
                pair.left.id,
                pair.left.reference_name,
                pair.right.entity_type,
                pair.right.id,
                pair.right.reference_name,
                version,
                raw,
            ],
        )?;
        debug!("Stored link {} at version {}", pair, version);
        Ok(())
    }

    /// Tombstones a link at `version`.
    pub fn delete_link(&self, pair: &EntityLinkPair, version: Version) -> StorageResult<()> {
        let conn = self.lock()?;
        ensure_link_not_stale(&conn, pair, version)?;
        let sql = format!(
            "INSERT OR REPLACE INTO links ({PAIR_COLUMNS}, status, version, payload) \
             VALUES (?, ?, ?, ?, ?, ?, 'deleted', ?, NULL)"
        );
        conn.execute(
            &sql,
            params![
                pair.left.entity_type,
                pair.left.id,
                pair.left.reference_name,
                pair.right.entity_type,
                pair.right.id,
                pair.right.reference_name,
                version,
            ],
        )?;
        debug!("Tombstoned link {} at version {}", pair, version);
        Ok(())
    }
}

pub(crate) fn all_links_in(conn: &Connection) -> StorageResult<Vec<EntityLink>> {
    let sql = format!("SELECT {PAIR_COLUMNS}, status, version FROM links ORDER BY {PAIR_COLUMNS}");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row_to_pair(row)?,
                row.get::<_, String>(6)?,
                row.get::<_, i64>(7)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(pair, status, version)| {
            Ok(EntityLink {
                pair,
                status: parse_status(&status)?,
                version,
            })
        })
        .collect()
}

fn link_in(conn: &Connection, pair: &EntityLinkPair) -> StorageResult<Option<EntityLink>> {
    let sql = format!("SELECT status, version FROM links WHERE {PAIR_FILTER}");
    let result = conn.query_row(
        &sql,
        params![
            pair.left.entity_type,
            pair.left.id,
            pair.left.reference_name,
            pair.right.entity_type,
            pair.right.id,
            pair.right.reference_name,
        ],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
    );
    match result {
        Ok((status, version)) => Ok(Some(EntityLink {
            pair: pair.clone(),
            status: parse_status(&status)?,
            version,
        })),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn ensure_link_not_stale(
    conn: &Connection,
    pair: &EntityLinkPair,
    version: Version,
) -> StorageResult<()> {
    if let Some(existing) = link_in(conn, pair)? {
        if existing.version > version {
            return Err(StorageError::StaleVersion {
                key: pair.key(),
                stored: existing.version,
                attempted: version,
            });
        }
    }
    Ok(())
}

/// Reads the six pair columns starting at index 0.
fn row_to_pair(row: &duckdb::Row<'_>) -> duckdb::Result<EntityLinkPair> {
    Ok(EntityLinkPair::new(
        EntityLinkReference::new(
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ),
        EntityLinkReference::new(
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
        ),
    ))
}
