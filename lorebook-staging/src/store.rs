//! The staging store and its synchronous surface.

use crate::event::StagingEvent;
use crate::state::{Key, LinkEntry, LinkLoad, StagingState};
use lorebook_sync::{StoreBackend, StoreReader};
use lorebook_types::{
    DataWrapper, EntityId, EntityLinkPair, EntityLinkResult, ItemStatus, NO_VERSION, StoreState,
    Version,
};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// State of one entity.
pub type EntityState = DataWrapper<Value, EntityId>;

/// State of one file.
pub type FileState = DataWrapper<Vec<u8>, String>;

/// State of the link set of one entity, oriented from that entity.
pub type LinksState = DataWrapper<Vec<EntityLinkResult>, EntityId>;

const EVENT_CAPACITY: usize = 1024;

pub(crate) struct Inner {
    pub(crate) primary: Arc<dyn StoreBackend>,
    pub(crate) fallback: Option<Arc<dyn StoreReader>>,
    state: Mutex<StagingState>,
    events: broadcast::Sender<StagingEvent>,
}

/// In-memory overlay over a primary store with an optional fallback reader.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct StagingStore {
    pub(crate) inner: Arc<Inner>,
}

impl StagingStore {
    pub fn new(primary: Arc<dyn StoreBackend>, fallback: Option<Arc<dyn StoreReader>>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                primary,
                fallback,
                state: Mutex::new(StagingState::default()),
                events,
            }),
        }
    }

    /// Receives every state transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StagingEvent> {
        self.inner.events.subscribe()
    }

    /// Locks the maps, recovering from poisoning.
    pub(crate) fn state(&self) -> MutexGuard<'_, StagingState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, event: StagingEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    /// Starts a background fetch for `key` unless one is already running.
    /// Returns false when no Tokio runtime is available.
    fn schedule(&self, st: &mut StagingState, key: Key) -> bool {
        let Ok(handle) = Handle::try_current() else {
            warn!("No runtime to fetch {:?}; value stays unresolved", key);
            return false;
        };
        if !st.in_flight.insert(key.clone()) {
            return true;
        }
        let store = self.clone();
        handle.spawn(async move {
            match key {
                Key::Entity(id) => {
                    store.fetch_entity(&id).await;
                }
                Key::File(name) => {
                    store.fetch_file(&name).await;
                }
                Key::Links(id) => {
                    store.fetch_links(&id).await;
                }
                Key::Link(_) => {}
            }
        });
        true
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Current state of an entity. An unseen id reports `Pending` and is
    /// fetched in the background.
    pub fn entity(&self, id: &EntityId) -> EntityState {
        let mut st = self.state();
        if let Some(state) = st.entities.get(id) {
            return state.clone();
        }
        let pending = DataWrapper::Pending { id: id.clone() };
        if self.schedule(&mut st, Key::Entity(id.clone())) {
            st.entities.insert(id.clone(), pending.clone());
        }
        pending
    }

    /// Current state of a file, fetched in the background when unseen.
    pub fn file(&self, name: &str) -> FileState {
        let mut st = self.state();
        if let Some(state) = st.files.get(name) {
            return state.clone();
        }
        let pending = DataWrapper::Pending {
            id: name.to_string(),
        };
        if self.schedule(&mut st, Key::File(name.to_string())) {
            st.files.insert(name.to_string(), pending.clone());
        }
        pending
    }

    /// Active links of an entity, fetched in the background when not loaded.
    pub fn links_of(&self, id: &EntityId) -> LinksState {
        let mut st = self.state();
        if !st.link_loads.contains_key(id) && self.schedule(&mut st, Key::Links(id.clone())) {
            st.link_loads.insert(id.clone(), LinkLoad::Pending);
        }
        links_state(&st, id)
    }

    /// Index snapshot of every settled key. Pending and failed keys are
    /// left out, as are ids only ever seen as missing.
    pub fn read_store_state(&self) -> StoreState {
        self.state().snapshot()
    }

    /// Number of locally changed keys not yet flushed.
    pub fn pending_changes(&self) -> usize {
        self.state().dirty.len()
    }

    // ── Local writes ─────────────────────────────────────────────

    pub fn put_entity(&self, id: &EntityId, version: Version, data: Value) {
        let state = DataWrapper::Active {
            id: id.clone(),
            data,
            version,
        };
        {
            let mut st = self.state();
            st.mark_local(Key::Entity(id.clone()));
            st.entities.insert(id.clone(), state.clone());
        }
        debug!("Staged entity {} at version {}", id, version);
        self.emit(StagingEvent::Entity(state));
    }

    /// Tombstones an entity and every known active link touching it, all
    /// with the same version.
    pub fn delete_entity(&self, id: &EntityId, version: Version) {
        let state = DataWrapper::Deleted {
            id: id.clone(),
            version,
        };
        let cascaded: Vec<EntityLinkPair> = {
            let mut st = self.state();
            st.mark_local(Key::Entity(id.clone()));
            st.entities.insert(id.clone(), state.clone());

            let touching: Vec<EntityLinkPair> = st
                .links
                .iter()
                .filter(|(pair, entry)| pair.touches(id) && entry.status.is_active())
                .map(|(pair, _)| pair.clone())
                .collect();
            for pair in &touching {
                st.mark_local(Key::Link(pair.clone()));
                st.links.insert(pair.clone(), tombstone(version));
            }
            touching
        };
        debug!(
            "Staged deletion of {} at version {} ({} links)",
            id,
            version,
            cascaded.len()
        );
        self.emit(StagingEvent::Entity(state));
        for pair in cascaded {
            self.emit(StagingEvent::Link {
                pair,
                status: ItemStatus::Deleted,
                version,
            });
        }
    }

    pub fn put_file(&self, name: &str, version: Version, content: Vec<u8>) {
        let state = DataWrapper::Active {
            id: name.to_string(),
            data: content,
            version,
        };
        {
            let mut st = self.state();
            st.mark_local(Key::File(name.to_string()));
            st.files.insert(name.to_string(), state.clone());
        }
        self.emit(StagingEvent::File(state));
    }

    pub fn delete_file(&self, name: &str, version: Version) {
        let state = DataWrapper::Deleted {
            id: name.to_string(),
            version,
        };
        {
            let mut st = self.state();
            st.mark_local(Key::File(name.to_string()));
            st.files.insert(name.to_string(), state.clone());
        }
        self.emit(StagingEvent::File(state));
    }

    /// Adds a link observed from either endpoint. The observation is stored
    /// under its canonical pair.
    pub fn add_link(&self, link: &EntityLinkResult) {
        self.set_link(
            link.pair(),
            LinkEntry {
                status: ItemStatus::Active,
                version: link.version,
                payload: link.payload.clone(),
            },
        );
    }

    pub fn delete_link(&self, pair: &EntityLinkPair, version: Version) {
        let pair = EntityLinkPair::new(pair.left.clone(), pair.right.clone());
        self.set_link(pair, tombstone(version));
    }

    pub(crate) fn set_link(&self, pair: EntityLinkPair, entry: LinkEntry) {
        let (status, version) = (entry.status, entry.version);
        {
            let mut st = self.state();
            st.mark_local(Key::Link(pair.clone()));
            st.links.insert(pair.clone(), entry);
        }
        self.emit(StagingEvent::Link {
            pair,
            status,
            version,
        });
    }
}

pub(crate) fn tombstone(version: Version) -> LinkEntry {
    LinkEntry {
        status: ItemStatus::Deleted,
        version,
        payload: Value::Null,
    }
}

pub(crate) fn links_state(st: &StagingState, id: &EntityId) -> LinksState {
    match st.link_loads.get(id) {
        Some(LinkLoad::Loaded) => {
            let data = st.links_from(id);
            let version = data.iter().map(|l| l.version).max().unwrap_or(NO_VERSION);
            DataWrapper::Active {
                id: id.clone(),
                data,
                version,
            }
        }
        Some(LinkLoad::Failure(message)) => DataWrapper::Failure {
            id: id.clone(),
            message: message.clone(),
        },
        Some(LinkLoad::Pending) | None => DataWrapper::Pending { id: id.clone() },
    }
}
