//! Push/pull synchronizer.
//!
//! Owns a local and a remote store. `push` reconciles local into remote and
//! `pull` reconciles remote into local. Only one run may be active at a
//! time. Status is published on a `watch` channel, progress on a
//! `broadcast` channel.

use crate::engine::{SyncActions, SyncProgress, extract_actions, perform_actions};
use crate::error::{SyncError, SyncResult};
use crate::store::StoreBackend;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, watch};
use tracing::{error, info};

/// Direction of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Push,
    Pull,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOperation::Push => write!(f, "push"),
            SyncOperation::Pull => write!(f, "pull"),
        }
    }
}

/// Current state of the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Idle,
    Running {
        operation: SyncOperation,
        progress: SyncProgress,
    },
    Failed {
        operation: SyncOperation,
        message: String,
    },
}

/// Events emitted while running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Started {
        operation: SyncOperation,
        total: usize,
    },
    Progress {
        operation: SyncOperation,
        progress: SyncProgress,
    },
    Completed {
        operation: SyncOperation,
        applied: usize,
    },
    Failed {
        operation: SyncOperation,
        message: String,
    },
}

/// Clears the running flag when a run ends, including on cancellation.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Moves changes between a local and a remote store.
pub struct Synchronizer {
    local: Arc<dyn StoreBackend>,
    remote: Arc<dyn StoreBackend>,
    status: watch::Sender<SyncStatus>,
    events: broadcast::Sender<SyncEvent>,
    running: AtomicBool,
}

impl Synchronizer {
    pub fn new(local: Arc<dyn StoreBackend>, remote: Arc<dyn StoreBackend>) -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        let (events, _) = broadcast::channel(256);
        Self {
            local,
            remote,
            status,
            events,
            running: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Local changes not yet on the remote.
    pub async fn outgoing(&self) -> SyncResult<SyncActions> {
        extract_actions(self.local.as_ref(), self.remote.as_ref()).await
    }

    /// Remote changes not yet in the local store.
    pub async fn incoming(&self) -> SyncResult<SyncActions> {
        extract_actions(self.remote.as_ref(), self.local.as_ref()).await
    }

    /// Reconciles local into remote.
    pub async fn push(&self) -> SyncResult<SyncActions> {
        self.run(SyncOperation::Push).await
    }

    /// Reconciles remote into local.
    pub async fn pull(&self) -> SyncResult<SyncActions> {
        self.run(SyncOperation::Pull).await
    }

    async fn run(&self, operation: SyncOperation) -> SyncResult<SyncActions> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SyncError::InvalidState(format!(
                "cannot {operation} while another sync is running"
            )));
        }
        let _guard = RunGuard(&self.running);

        let (source, destination) = match operation {
            SyncOperation::Push => (self.local.as_ref(), self.remote.as_ref()),
            SyncOperation::Pull => (self.remote.as_ref(), self.local.as_ref()),
        };

        self.status.send_replace(SyncStatus::Running {
            operation,
            progress: SyncProgress::default(),
        });

        match self.execute(operation, source, destination).await {
            Ok(actions) => {
                self.status.send_replace(SyncStatus::Idle);
                let _ = self.events.send(SyncEvent::Completed {
                    operation,
                    applied: actions.len(),
                });
                info!("{} finished: {} actions applied", operation, actions.len());
                Ok(actions)
            }
            Err(e) => {
                let message = e.to_string();
                error!("{} failed: {}", operation, message);
                self.status.send_replace(SyncStatus::Failed {
                    operation,
                    message: message.clone(),
                });
                let _ = self.events.send(SyncEvent::Failed { operation, message });
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        operation: SyncOperation,
        source: &dyn StoreBackend,
        destination: &dyn StoreBackend,
    ) -> SyncResult<SyncActions> {
        let actions = extract_actions(source, destination).await?;
        let total = actions.len();
        let _ = self.events.send(SyncEvent::Started { operation, total });
        self.status.send_replace(SyncStatus::Running {
            operation,
            progress: SyncProgress {
                completed: 0,
                total,
                message: format!("{total} actions"),
            },
        });

        let status = &self.status;
        let events = &self.events;
        let mut report = |progress: SyncProgress| {
            status.send_replace(SyncStatus::Running {
                operation,
                progress: progress.clone(),
            });
            let _ = events.send(SyncEvent::Progress {
                operation,
                progress,
            });
        };
        perform_actions(source, destination, &actions, &mut report).await?;
        Ok(actions)
    }
}
