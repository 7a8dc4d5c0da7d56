//! DuckDB storage layer for Lorebook.
//!
//! Provides the local durable cache ("query store") that every other layer
//! reads through.
//!
//! # Architecture
//!
//! - Entities are stored as JSON content keyed by `(type, id)` with a status
//!   and a version; deleted entities keep a tombstone row
//! - Tag memberships and full-text n-gram tokens are kept as posting tables
//!   rebuilt atomically on every entity write
//! - File blobs carry their own version and a reference table so linked files
//!   are never reclaimed
//! - Relation links are keyed by their canonical endpoint pair
//! - The two-way relation binder stores per-side pointers in its own table
//!
//! Every public operation locks the shared connection, performs one logical
//! operation and releases it. Nothing spans calls.

mod error;
mod files;
mod links;
mod query_store;
pub mod relation;
mod schema;
mod terms;

pub use error::{StorageError, StorageResult};
pub use query_store::{FullTextTerm, QueryStore, ScoredMatch, TagPosting};
pub use relation::{RelationSide, RelationStore, RelationTarget, RelationView, TwoWayRelation};
pub use terms::{derive_tag_postings, search_terms, search_terms_for_content};

use std::path::{Path, PathBuf};
use tracing::warn;

/// Write-ahead log DuckDB keeps next to a database file:
/// `lorebook.duckdb` logs to `lorebook.duckdb.wal`.
pub fn wal_path(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(".wal");
    PathBuf::from(name)
}

/// Opens the on-disk cache database behind [`QueryStore::open`].
///
/// The cache only ever holds data that can be pulled again from a remote,
/// so when a crash left a log DuckDB refuses to replay, the log is dropped
/// and the open retried once. Limits apply to whichever connection opens.
pub fn open_duckdb_with_wal_recovery(
    path: &Path,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<duckdb::Connection> {
    let conn = match duckdb::Connection::open(path) {
        Ok(conn) => conn,
        Err(err) => {
            let wal = wal_path(path);
            if !wal.exists() {
                return Err(err.into());
            }
            warn!(
                "Cache at {} did not open ({}), dropping {} and retrying",
                path.display(),
                err,
                wal.display()
            );
            std::fs::remove_file(&wal)?;
            duckdb::Connection::open(path)?
        }
    };
    apply_resource_limits(&conn, memory_limit, threads)?;
    Ok(conn)
}

/// Apply memory and thread limits to a DuckDB connection.
fn apply_resource_limits(
    conn: &duckdb::Connection,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<()> {
    conn.execute_batch(&format!(
        "PRAGMA memory_limit='{}'; PRAGMA threads={};",
        memory_limit, threads
    ))?;
    Ok(())
}
