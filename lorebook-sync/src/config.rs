//! Workspace configuration.
//!
//! Loaded from a JSON file by the binary. Every section has defaults so a
//! partial file is enough:
//!
//! ```json
//! {
//!   "data_dir": "./data",
//!   "remote": { "kind": "git", "owner": "me", "repo": "wiki", "branch": "main" }
//! }
//! ```

use crate::backend::directory::DirectoryBackendConfig;
use crate::backend::git::GitBackendConfig;
use crate::backend::http::HttpBackendConfig;
use crate::backend::{DirectoryFileBackend, FileBackend, GitFileBackend, HttpFileBackend};
use crate::error::SyncResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Environment variable that overrides the configured remote token.
pub const TOKEN_ENV: &str = "LOREBOOK_TOKEN";

/// Database file name inside the data directory.
pub const DATABASE_FILE: &str = "lorebook.duckdb";

/// Remote backend selection, discriminated by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RemoteConfig {
    Git(GitBackendConfig),
    Http(HttpBackendConfig),
    Directory(DirectoryBackendConfig),
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig::Directory(DirectoryBackendConfig::default())
    }
}

impl RemoteConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteConfig::Git(_) => "git",
            RemoteConfig::Http(_) => "http",
            RemoteConfig::Directory(_) => "directory",
        }
    }

    /// Replaces the access token. Directory remotes have none.
    pub fn set_token(&mut self, token: String) {
        match self {
            RemoteConfig::Git(git) => git.token = token,
            RemoteConfig::Http(http) => http.token = Some(token),
            RemoteConfig::Directory(_) => {}
        }
    }

    /// Builds the file backend this configuration describes.
    pub fn build_backend(&self) -> SyncResult<Arc<dyn FileBackend>> {
        Ok(match self {
            RemoteConfig::Git(config) => Arc::new(GitFileBackend::new(config.clone())?),
            RemoteConfig::Http(config) => Arc::new(HttpFileBackend::new(config.clone())?),
            RemoteConfig::Directory(config) => Arc::new(DirectoryFileBackend::new(config.clone())),
        })
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LorebookConfig {
    /// Directory holding the local database.
    pub data_dir: PathBuf,
    pub remote: RemoteConfig,
}

impl Default for LorebookConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("lorebook-data"),
            remote: RemoteConfig::default(),
        }
    }
}

impl LorebookConfig {
    pub fn from_json(raw: &str) -> SyncResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Reads a config file; a missing file yields the defaults.
    pub async fn load(path: &Path) -> SyncResult<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => Self::from_json(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Applies a non-empty token override.
    pub fn with_token_override(mut self, token: Option<String>) -> Self {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.remote.set_token(token);
        }
        self
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}
