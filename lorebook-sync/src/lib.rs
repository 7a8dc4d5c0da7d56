//! Synchronization layer for Lorebook.
//!
//! Moves entity, file and link changes between the local query store and a
//! remote file tree (a Git branch, a REST endpoint or a local directory).
//!
//! # Architecture
//!
//! - **Backends** expose a flat file namespace with buffered, committed writes
//! - **Stores** implement the reader/writer contracts over the local query
//!   store ([`LocalStore`]) or over any backend ([`FileTreeStore`])
//! - **Engine** diffs two index snapshots by version and applies the result
//! - **Synchronizer** runs push/pull one at a time and publishes status
//!
//! # Example
//!
//! ```no_run
//! use lorebook_storage::QueryStore;
//! use lorebook_sync::{FileTreeStore, LocalStore, MemoryFileBackend, Synchronizer};
//! use std::sync::Arc;
//!
//! # async fn run() -> lorebook_sync::SyncResult<()> {
//! let local = Arc::new(LocalStore::new(QueryStore::open_in_memory()?));
//! let remote = Arc::new(FileTreeStore::new(&MemoryFileBackend::new()));
//! let sync = Synchronizer::new(local, remote);
//! sync.push().await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod engine;
mod error;
pub mod setup;
pub mod store;
pub mod synchronizer;

pub use backend::{
    DirectoryFileBackend, FileBackend, FileOp, FileReadonlyBackend, FileReader, FileWriter,
    GitFileBackend, GitHubClient, HttpFileBackend, MemoryFileBackend, WriteBuffer,
};
pub use backend::directory::DirectoryBackendConfig;
pub use backend::git::{GitBackendConfig, GitBranch, GitRepository};
pub use backend::http::HttpBackendConfig;
pub use config::{LorebookConfig, RemoteConfig, TOKEN_ENV};
pub use engine::{
    EntityAction, FileAction, LinkAction, SyncActions, SyncProgress, diff_states,
    extract_actions, perform_actions, reconcile,
};
pub use error::{SyncError, SyncResult};
pub use setup::GitSetup;
pub use store::{FileTreeStore, LocalStore, StoreBackend, StoreReader, StoreWriter};
pub use synchronizer::{SyncEvent, SyncOperation, SyncStatus, Synchronizer};
