//! File blobs and their reference counts.

use crate::error::{StorageError, StorageResult};
use crate::query_store::{QueryStore, parse_status};
use duckdb::{Connection, params};
use lorebook_types::{EntityId, FileIndex, Version};
use tracing::{debug, info};

impl QueryStore {
    /// Returns the index entry (including tombstones) for a file.
    pub fn get_file_index(&self, name: &str) -> StorageResult<Option<FileIndex>> {
        let conn = self.lock()?;
        file_index_in(&conn, name)
    }

    /// Returns the bytes of an active file.
    pub fn read_file(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        let conn = self.lock()?;
        let result = conn.query_row(
            "SELECT content FROM files WHERE name = ? AND status = 'active'",
            params![name],
            |row| row.get::<_, Option<Vec<u8>>>(0),
        );
        match result {
            Ok(content) => Ok(content),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Stores file bytes at `version`.
    pub fn write_file(&self, name: &str, version: Version, content: &[u8]) -> StorageResult<()> {
        let conn = self.lock()?;
        ensure_file_not_stale(&conn, name, version)?;
        conn.execute(
            "INSERT OR REPLACE INTO files (name, status, version, content) VALUES (?, 'active', ?, ?)",
            params![name, version, content.to_vec()],
        )?;
        debug!("Stored file {} ({} bytes) at version {}", name, content.len(), version);
        Ok(())
    }

    /// Drops file bytes, leaving a tombstone with `version`.
    ///
    /// This is the sync-driven delete and does not consult references; use
    /// [`QueryStore::reclaim_unlinked_files`] to collect unused files safely.
    pub fn delete_file(&self, name: &str, version: Version) -> StorageResult<()> {
        let conn = self.lock()?;
        ensure_file_not_stale(&conn, name, version)?;
        conn.execute(
            "INSERT OR REPLACE INTO files (name, status, version, content) VALUES (?, 'deleted', ?, NULL)",
            params![name, version],
        )?;
        debug!("Tombstoned file {} at version {}", name, version);
        Ok(())
    }

    /// Records that `owner` references the file.
    pub fn link_file(&self, name: &str, owner: &EntityId) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO file_refs (name, owner_type, owner_id) VALUES (?, ?, ?)",
            params![name, owner.entity_type, owner.id],
        )?;
        Ok(())
    }

    /// Removes the reference from `owner` to the file.
    pub fn unlink_file(&self, name: &str, owner: &EntityId) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM file_refs WHERE name = ? AND owner_type = ? AND owner_id = ?",
            params![name, owner.entity_type, owner.id],
        )?;
        Ok(())
    }

    /// Number of entities referencing the file.
    pub fn file_reference_count(&self, name: &str) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM file_refs WHERE name = ?",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Tombstones every active file nothing references. Linked files are
    /// never touched. Returns the reclaimed names.
    pub fn reclaim_unlinked_files(&self, version: Version) -> StorageResult<Vec<String>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let mut stmt = tx.prepare(
            "SELECT f.name FROM files f \
             WHERE f.status = 'active' AND f.version <= ? \
             AND NOT EXISTS (SELECT 1 FROM file_refs r WHERE r.name = f.name) \
             ORDER BY f.name",
        )?;
        let names = stmt
            .query_map(params![version], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        for name in &names {
            tx.execute(
                "UPDATE files SET status = 'deleted', version = ?, content = NULL WHERE name = ?",
                params![version, name],
            )?;
        }
        tx.commit()?;

        if !names.is_empty() {
            info!("Reclaimed {} unlinked files", names.len());
        }
        Ok(names)
    }
}

fn file_index_in(conn: &Connection, name: &str) -> StorageResult<Option<FileIndex>> {
    let result = conn.query_row(
        "SELECT status, version FROM files WHERE name = ?",
        params![name],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
    );
    match result {
        Ok((status, version)) => Ok(Some(FileIndex {
            name: name.to_string(),
            status: parse_status(&status)?,
            version,
        })),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn ensure_file_not_stale(conn: &Connection, name: &str, version: Version) -> StorageResult<()> {
    if let Some(existing) = file_index_in(conn, name)? {
        if existing.version > version {
            return Err(StorageError::StaleVersion {
                key: name.to_string(),
                stored: existing.version,
                attempted: version,
            });
        }
    }
    Ok(())
}
