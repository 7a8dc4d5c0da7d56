//! Reconciliation engine.
//!
//! Compares the index snapshots of two stores and produces the smallest
//! batch of actions that makes the destination agree with the source.
//! Ordering is last-write-wins by version: the larger version wins and equal
//! versions are left alone, so applying a batch and diffing again yields an
//! empty batch.
//!
//! Per key:
//!
//! | source        | destination          | action                          |
//! |---------------|----------------------|---------------------------------|
//! | Active v      | missing              | put v                           |
//! | Deleted v     | missing              | delete v                        |
//! | Active v      | any, version < v     | put v                           |
//! | Deleted v     | any, version < v     | delete v                        |
//! | any v         | any, version >= v    | none                            |
//! | missing       | Active w             | delete w                        |
//! | missing       | Deleted w            | none                            |

use crate::error::{SyncError, SyncResult};
use crate::store::{StoreReader, StoreWriter};
use lorebook_types::{EntityId, EntityLinkPair, ItemStatus, StoreState, Version};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// One entity action with its target version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAction {
    pub id: EntityId,
    pub version: Version,
}

/// One file action with its target version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAction {
    pub name: String,
    pub version: Version,
}

/// One link action with its target version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAction {
    pub pair: EntityLinkPair,
    pub version: Version,
}

/// A batch of actions. Every list is sorted by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncActions {
    pub put_entities: Vec<EntityAction>,
    pub delete_entities: Vec<EntityAction>,
    pub put_files: Vec<FileAction>,
    pub delete_files: Vec<FileAction>,
    pub put_links: Vec<LinkAction>,
    pub delete_links: Vec<LinkAction>,
}

impl SyncActions {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of actions.
    pub fn len(&self) -> usize {
        self.put_entities.len()
            + self.delete_entities.len()
            + self.put_files.len()
            + self.delete_files.len()
            + self.put_links.len()
            + self.delete_links.len()
    }
}

/// Progress of an apply run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub completed: usize,
    pub total: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Put(Version),
    Delete(Version),
}

fn decide(source: Option<(ItemStatus, Version)>, dest: Option<(ItemStatus, Version)>) -> Option<Step> {
    match (source, dest) {
        (Some((status, version)), None) => Some(match status {
            ItemStatus::Active => Step::Put(version),
            ItemStatus::Deleted => Step::Delete(version),
        }),
        (Some((status, version)), Some((_, dest_version))) if version > dest_version => {
            Some(match status {
                ItemStatus::Active => Step::Put(version),
                ItemStatus::Deleted => Step::Delete(version),
            })
        }
        (Some(_), Some(_)) => None,
        (None, Some((ItemStatus::Active, dest_version))) => Some(Step::Delete(dest_version)),
        (None, Some((ItemStatus::Deleted, _))) | (None, None) => None,
    }
}

/// Diffs two keyed snapshots, visiting keys in order.
fn diff<K: Ord + Clone>(
    source: BTreeMap<K, (ItemStatus, Version)>,
    dest: BTreeMap<K, (ItemStatus, Version)>,
    mut on_step: impl FnMut(K, Step),
) {
    let keys: BTreeSet<&K> = source.keys().chain(dest.keys()).collect();
    for key in keys {
        if let Some(step) = decide(source.get(key).copied(), dest.get(key).copied()) {
            on_step(key.clone(), step);
        }
    }
}

/// Computes the actions for a pair of snapshots.
pub fn diff_states(source: &StoreState, destination: &StoreState) -> SyncActions {
    let mut actions = SyncActions::default();

    let entities = |state: &StoreState| {
        state
            .entities
            .iter()
            .map(|e| (e.id.clone(), (e.status, e.version)))
            .collect::<BTreeMap<_, _>>()
    };
    diff(entities(source), entities(destination), |id, step| match step {
        Step::Put(version) => actions.put_entities.push(EntityAction { id, version }),
        Step::Delete(version) => actions.delete_entities.push(EntityAction { id, version }),
    });

    let files = |state: &StoreState| {
        state
            .files
            .iter()
            .map(|f| (f.name.clone(), (f.status, f.version)))
            .collect::<BTreeMap<_, _>>()
    };
    diff(files(source), files(destination), |name, step| match step {
        Step::Put(version) => actions.put_files.push(FileAction { name, version }),
        Step::Delete(version) => actions.delete_files.push(FileAction { name, version }),
    });

    let links = |state: &StoreState| {
        state
            .links
            .iter()
            .map(|l| (l.pair.clone(), (l.status, l.version)))
            .collect::<BTreeMap<_, _>>()
    };
    diff(links(source), links(destination), |pair, step| match step {
        Step::Put(version) => actions.put_links.push(LinkAction { pair, version }),
        Step::Delete(version) => actions.delete_links.push(LinkAction { pair, version }),
    });

    actions
}

/// Reads both snapshots and computes the actions that bring `destination`
/// in line with `source`.
pub async fn extract_actions<S, D>(source: &S, destination: &D) -> SyncResult<SyncActions>
where
    S: StoreReader + ?Sized,
    D: StoreReader + ?Sized,
{
    let source_state = source.read_store_state().await?;
    let destination_state = destination.read_store_state().await?;
    let actions = diff_states(&source_state, &destination_state);
    debug!(
        "Extracted {} actions ({} entity puts, {} entity deletes)",
        actions.len(),
        actions.put_entities.len(),
        actions.delete_entities.len()
    );
    Ok(actions)
}

/// Applies `actions` to `destination`, fetching content from `source`.
///
/// Order: put files, put entities, put links, delete links, delete entities,
/// delete files, then commit. The first failure aborts; already applied
/// actions stay applied and a re-run picks up the rest.
pub async fn perform_actions<S, D>(
    source: &S,
    destination: &D,
    actions: &SyncActions,
    progress: &mut (dyn FnMut(SyncProgress) + Send),
) -> SyncResult<()>
where
    S: StoreReader + ?Sized,
    D: StoreWriter + ?Sized,
{
    let total = actions.len();
    let mut completed = 0;
    let mut step = |message: String| {
        completed += 1;
        progress(SyncProgress {
            completed,
            total,
            message,
        });
    };

    for action in &actions.put_files {
        let content = source
            .read_file(&action.name)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("file {}", action.name)))?;
        destination
            .put_file(&action.name, action.version, content)
            .await?;
        step(format!("put file {}", action.name));
    }

    for action in &actions.put_entities {
        let content = source
            .entity_content(&action.id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("entity {}", action.id)))?;
        destination
            .put_entity(&action.id, action.version, content)
            .await?;
        step(format!("put entity {}", action.id));
    }

    for action in &actions.put_links {
        let payload = source
            .link_payload(&action.pair)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("link {}", action.pair)))?;
        destination
            .put_link(&action.pair, action.version, payload)
            .await?;
        step(format!("put link {}", action.pair));
    }

    for action in &actions.delete_links {
        destination.delete_link(&action.pair, action.version).await?;
        step(format!("delete link {}", action.pair));
    }

    for action in &actions.delete_entities {
        destination.delete_entity(&action.id, action.version).await?;
        step(format!("delete entity {}", action.id));
    }

    for action in &actions.delete_files {
        destination.delete_file(&action.name, action.version).await?;
        step(format!("delete file {}", action.name));
    }

    destination.commit().await?;
    if total > 0 {
        info!("Applied {} sync actions", total);
    }
    Ok(())
}

/// Extracts and applies in one go. Returns the applied batch.
pub async fn reconcile<S, D>(
    source: &S,
    destination: &D,
    progress: &mut (dyn FnMut(SyncProgress) + Send),
) -> SyncResult<SyncActions>
where
    S: StoreReader + ?Sized,
    D: StoreReader + StoreWriter + ?Sized,
{
    let actions = extract_actions(source, destination).await?;
    perform_actions(source, destination, &actions, progress).await?;
    Ok(actions)
}
