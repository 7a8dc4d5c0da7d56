//! Command handling for the `lorebook` binary.
//!
//! The binary only parses arguments, sets up logging and prints what
//! [`Workspace::run`] returns, so every command can be exercised from tests.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lorebook_staging::StagingStore;
use lorebook_storage::{QueryStore, search_terms};
use lorebook_sync::{FileTreeStore, LocalStore, LorebookConfig, SyncActions, Synchronizer};
use lorebook_types::{DataWrapper, EntityId, NO_VERSION};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "lorebook")]
#[command(about = "Offline-first wiki sync")]
pub struct Cli {
    /// Path to the JSON config file
    #[arg(short, long, default_value = "lorebook.json")]
    pub config: PathBuf,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send local changes to the remote
    Push,
    /// Bring remote changes into the local store
    Pull,
    /// Show what a push and a pull would change
    Status,
    /// Print one entity, reading through to the remote if needed
    Get { entity_type: String, id: String },
    /// Full-text search over local entities
    Search {
        text: String,
        /// Maximum number of hits
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// List entities carrying a tag value
    Tag { property: String, value: String },
}

/// The local store and the configured remote, opened together.
pub struct Workspace {
    local: LocalStore,
    remote: Arc<FileTreeStore>,
}

impl Workspace {
    /// Opens (creating if needed) the local database and connects the remote.
    pub async fn open(config: &LorebookConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {:?}", config.data_dir))?;
        let path = config.database_path();
        let store = QueryStore::open(&path)
            .with_context(|| format!("Failed to open database {:?}", path))?;
        let backend = config
            .remote
            .build_backend()
            .context("Failed to configure remote")?;
        debug!("Opened workspace at {:?}", path);
        Ok(Self {
            local: LocalStore::new(store),
            remote: Arc::new(FileTreeStore::new(backend.as_ref())),
        })
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    fn synchronizer(&self) -> Synchronizer {
        Synchronizer::new(Arc::new(self.local.clone()), self.remote.clone())
    }

    /// Runs one command and returns the text to print.
    pub async fn run(&self, command: &Command) -> Result<String> {
        match command {
            Command::Push => {
                let actions = self.synchronizer().push().await.context("Push failed")?;
                Ok(format!("Pushed: {}", summarize(&actions)))
            }
            Command::Pull => {
                let actions = self.synchronizer().pull().await.context("Pull failed")?;
                Ok(format!("Pulled: {}", summarize(&actions)))
            }
            Command::Status => {
                let sync = self.synchronizer();
                let outgoing = sync.outgoing().await.context("Failed to diff local store")?;
                let incoming = sync.incoming().await.context("Failed to diff remote")?;
                Ok(format!(
                    "Outgoing: {}\nIncoming: {}",
                    summarize(&outgoing),
                    summarize(&incoming)
                ))
            }
            Command::Get { entity_type, id } => {
                let id = EntityId::new(entity_type.as_str(), id.as_str());
                let staging = StagingStore::new(
                    Arc::new(self.local.clone()),
                    Some(self.remote.clone()),
                );
                match staging.fetch_entity(&id).await {
                    DataWrapper::Active { data, version, .. } => Ok(format!(
                        "{id} (version {version})\n{}",
                        serde_json::to_string_pretty(&data)?
                    )),
                    DataWrapper::Deleted { version, .. } if version != NO_VERSION => {
                        Ok(format!("{id} was deleted at version {version}"))
                    }
                    DataWrapper::Deleted { .. } | DataWrapper::Pending { .. } => {
                        Ok(format!("{id} not found"))
                    }
                    DataWrapper::Failure { message, .. } => {
                        anyhow::bail!("Failed to read {id}: {message}")
                    }
                }
            }
            Command::Search { text, limit } => {
                let terms = search_terms(text);
                let store = self.local.query_store().clone();
                let hits = tokio::task::spawn_blocking(move || store.query_by_full_text(&terms))
                    .await?
                    .context("Search failed")?;
                let mut out = format!("{} matches", hits.len());
                for hit in hits.iter().take(*limit) {
                    write!(out, "\n  {} (score {})", hit.id, hit.score)?;
                }
                Ok(out)
            }
            Command::Tag { property, value } => {
                let store = self.local.query_store().clone();
                let (property, value) = (property.clone(), value.clone());
                let ids = tokio::task::spawn_blocking(move || store.query_by_tag(&property, &value))
                    .await?
                    .context("Tag query failed")?;
                let mut out = format!("{} entities", ids.len());
                for id in &ids {
                    write!(out, "\n  {id}")?;
                }
                Ok(out)
            }
        }
    }
}

/// One-line summary of an action batch.
pub fn summarize(actions: &SyncActions) -> String {
    if actions.is_empty() {
        return "up to date".to_string();
    }
    let parts = [
        (actions.put_entities.len(), "entity puts"),
        (actions.delete_entities.len(), "entity deletes"),
        (actions.put_files.len(), "file puts"),
        (actions.delete_files.len(), "file deletes"),
        (actions.put_links.len(), "link puts"),
        (actions.delete_links.len(), "link deletes"),
    ];
    parts
        .iter()
        .filter(|(count, _)| *count > 0)
        .map(|(count, label)| format!("{count} {label}"))
        .collect::<Vec<_>>()
        .join(", ")
}
