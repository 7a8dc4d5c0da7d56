// -- Schema --

use crate::error::StorageResult;
use duckdb::Connection;

/// Creates every table the query store uses.
///
/// Posting tables carry no unique constraint: their rows for an entity are
/// always deleted and re-inserted together inside one transaction.
pub(crate) fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            entity_type VARCHAR NOT NULL,
            entity_id VARCHAR NOT NULL,
            status VARCHAR NOT NULL,
            version BIGINT NOT NULL,
            content TEXT,
            PRIMARY KEY (entity_type, entity_id)
        );

        -- Derived postings: (collection, tag) -> entity
        CREATE TABLE IF NOT EXISTS entity_tags (
            property VARCHAR NOT NULL,
            value VARCHAR NOT NULL,
            entity_type VARCHAR NOT NULL,
            entity_id VARCHAR NOT NULL
        );

        -- Derived postings: (n-gram size, token) -> entity
        CREATE TABLE IF NOT EXISTS entity_terms (
            n_gram INTEGER NOT NULL,
            token VARCHAR NOT NULL,
            entity_type VARCHAR NOT NULL,
            entity_id VARCHAR NOT NULL
        );

        CREATE TABLE IF NOT EXISTS files (
            name VARCHAR PRIMARY KEY,
            status VARCHAR NOT NULL,
            version BIGINT NOT NULL,
            content BLOB
        );

        -- Reverse index from a file to the entities that reference it.
        CREATE TABLE IF NOT EXISTS file_refs (
            name VARCHAR NOT NULL,
            owner_type VARCHAR NOT NULL,
            owner_id VARCHAR NOT NULL,
            PRIMARY KEY (name, owner_type, owner_id)
        );

        CREATE TABLE IF NOT EXISTS links (
            left_type VARCHAR NOT NULL,
            left_id VARCHAR NOT NULL,
            left_ref VARCHAR NOT NULL,
            right_type VARCHAR NOT NULL,
            right_id VARCHAR NOT NULL,
            right_ref VARCHAR NOT NULL,
            status VARCHAR NOT NULL,
            version BIGINT NOT NULL,
            payload TEXT,
            PRIMARY KEY (left_type, left_id, left_ref, right_type, right_id, right_ref)
        );

        -- One-sided pointers written by the two-way relation binder.
        CREATE TABLE IF NOT EXISTS relation_pointers (
            side VARCHAR NOT NULL,
            source_id VARCHAR NOT NULL,
            target_id VARCHAR NOT NULL,
            payload TEXT NOT NULL,
            updated_at BIGINT NOT NULL,
            PRIMARY KEY (side, source_id, target_id)
        );
        "#,
    )?;
    Ok(())
}
