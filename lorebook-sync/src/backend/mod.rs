//! Remote file backends.
//!
//! A backend exposes a flat namespace of slash-separated file paths. Reads
//! go straight to the remote; writes are buffered by a [`FileWriter`] and
//! only land on [`FileWriter::commit`]. How a commit lands depends on the
//! backend: one Git commit, a run of HTTP requests, or local file writes.

pub mod directory;
pub mod git;
pub mod http;
pub mod memory;

use crate::error::SyncResult;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

pub use directory::DirectoryFileBackend;
pub use git::{GitBranch, GitFileBackend, GitHubClient, GitRepository};
pub use http::HttpFileBackend;
pub use memory::MemoryFileBackend;

/// Reads files from a remote.
#[async_trait]
pub trait FileReader: Send + Sync {
    /// Returns the file bytes, or `None` when the file does not exist.
    async fn read(&self, name: &str) -> SyncResult<Option<Vec<u8>>>;
}

/// Buffers file changes and lands them together.
#[async_trait]
pub trait FileWriter: Send + Sync {
    /// Stages a write. Later operations on the same path win.
    fn write(&mut self, name: &str, content: Vec<u8>);

    /// Stages a deletion.
    fn delete(&mut self, name: &str);

    /// Number of staged operations.
    fn pending(&self) -> usize;

    /// Lands the buffer. The buffer is emptied whether or not the commit
    /// succeeds; an empty buffer is a no-op.
    async fn commit(&mut self) -> SyncResult<()>;
}

/// A backend that can only be read.
pub trait FileReadonlyBackend: Send + Sync {
    fn reader(&self) -> Arc<dyn FileReader>;
}

/// A backend that can be read and written.
pub trait FileBackend: FileReadonlyBackend {
    fn writer(&self) -> Box<dyn FileWriter>;
}

/// One staged file change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOp {
    Write { name: String, content: Vec<u8> },
    Delete { name: String },
}

impl FileOp {
    pub fn name(&self) -> &str {
        match self {
            FileOp::Write { name, .. } | FileOp::Delete { name } => name,
        }
    }
}

/// Ordered buffer shared by every writer.
#[derive(Debug, Default, Clone)]
pub struct WriteBuffer {
    ops: Vec<FileOp>,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, name: &str, content: Vec<u8>) {
        self.ops.push(FileOp::Write {
            name: name.to_string(),
            content,
        });
    }

    pub fn delete(&mut self, name: &str) {
        self.ops.push(FileOp::Delete {
            name: name.to_string(),
        });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Takes the operations in the order they were staged.
    pub fn take(&mut self) -> Vec<FileOp> {
        std::mem::take(&mut self.ops)
    }

    /// Takes the last operation per path, ordered by path.
    pub fn take_final(&mut self) -> BTreeMap<String, FileOp> {
        let mut latest = BTreeMap::new();
        for op in self.take() {
            latest.insert(op.name().to_string(), op);
        }
        latest
    }
}
