//! In-process file backend.

use super::{FileBackend, FileOp, FileReadonlyBackend, FileReader, FileWriter, WriteBuffer};
use crate::error::SyncResult;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct Shared {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
    reads: AtomicUsize,
    commits: AtomicUsize,
}

/// Map-backed remote. Clones share the same files.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileBackend {
    shared: Arc<Shared>,
}

impl MemoryFileBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a file directly, bypassing the commit buffer.
    pub async fn insert(&self, name: &str, content: impl Into<Vec<u8>>) {
        self.shared
            .files
            .write()
            .await
            .insert(name.to_string(), content.into());
    }

    pub async fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.shared.files.read().await.get(name).cloned()
    }

    /// Sorted list of stored paths.
    pub async fn names(&self) -> Vec<String> {
        self.shared.files.read().await.keys().cloned().collect()
    }

    /// Number of reads served so far.
    pub fn read_count(&self) -> usize {
        self.shared.reads.load(Ordering::SeqCst)
    }

    /// Number of non-empty commits landed so far.
    pub fn commit_count(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileReader for MemoryFileBackend {
    async fn read(&self, name: &str) -> SyncResult<Option<Vec<u8>>> {
        self.shared.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.shared.files.read().await.get(name).cloned())
    }
}

impl FileReadonlyBackend for MemoryFileBackend {
    fn reader(&self) -> Arc<dyn FileReader> {
        Arc::new(self.clone())
    }
}

impl FileBackend for MemoryFileBackend {
    fn writer(&self) -> Box<dyn FileWriter> {
        Box::new(MemoryFileWriter {
            shared: self.shared.clone(),
            buffer: WriteBuffer::new(),
        })
    }
}

struct MemoryFileWriter {
    shared: Arc<Shared>,
    buffer: WriteBuffer,
}

#[async_trait]
impl FileWriter for MemoryFileWriter {
    fn write(&mut self, name: &str, content: Vec<u8>) {
        self.buffer.write(name, content);
    }

    fn delete(&mut self, name: &str) {
        self.buffer.delete(name);
    }

    fn pending(&self) -> usize {
        self.buffer.len()
    }

    async fn commit(&mut self) -> SyncResult<()> {
        let ops = self.buffer.take();
        if ops.is_empty() {
            return Ok(());
        }
        let count = ops.len();
        let mut files = self.shared.files.write().await;
        for op in ops {
            match op {
                FileOp::Write { name, content } => {
                    files.insert(name, content);
                }
                FileOp::Delete { name } => {
                    files.remove(&name);
                }
            }
        }
        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        debug!("Committed {} operations to memory backend", count);
        Ok(())
    }
}
