//! Local directory file backend.
//!
//! Useful as an offline remote (a synced folder, a USB stick) and in tests.

use super::{FileBackend, FileOp, FileReadonlyBackend, FileReader, FileWriter, WriteBuffer};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

/// Directory backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryBackendConfig {
    /// Root directory holding the remote tree.
    pub root: PathBuf,
}

impl Default for DirectoryBackendConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("lorebook-remote"),
        }
    }
}

/// Files under a root directory.
#[derive(Debug, Clone)]
pub struct DirectoryFileBackend {
    root: Arc<PathBuf>,
}

impl DirectoryFileBackend {
    pub fn new(config: DirectoryBackendConfig) -> Self {
        Self {
            root: Arc::new(config.root),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Resolves a slash-separated name under `root`, refusing anything that
/// would escape it.
fn resolve(root: &Path, name: &str) -> SyncResult<PathBuf> {
    let relative = Path::new(name);
    let escapes = name.is_empty()
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(SyncError::InvalidState(format!("invalid file name '{name}'")));
    }
    Ok(root.join(relative))
}

#[async_trait]
impl FileReader for DirectoryFileBackend {
    async fn read(&self, name: &str) -> SyncResult<Option<Vec<u8>>> {
        let path = resolve(&self.root, name)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl FileReadonlyBackend for DirectoryFileBackend {
    fn reader(&self) -> Arc<dyn FileReader> {
        Arc::new(self.clone())
    }
}

impl FileBackend for DirectoryFileBackend {
    fn writer(&self) -> Box<dyn FileWriter> {
        Box::new(DirectoryFileWriter {
            root: self.root.clone(),
            buffer: WriteBuffer::new(),
        })
    }
}

struct DirectoryFileWriter {
    root: Arc<PathBuf>,
    buffer: WriteBuffer,
}

#[async_trait]
impl FileWriter for DirectoryFileWriter {
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
        for op in ops {
            match op {
                FileOp::Write { name, content } => {
                    let path = resolve(&self.root, &name)?;
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent).await?;
                    }
                    fs::write(&path, content).await?;
                    debug!("Wrote {}", path.display());
                }
                FileOp::Delete { name } => {
                    let path = resolve(&self.root, &name)?;
                    match fs::remove_file(&path).await {
                        Ok(()) => debug!("Removed {}", path.display()),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
        info!("Committed {} operations to {}", count, self.root.display());
        Ok(())
    }
}
