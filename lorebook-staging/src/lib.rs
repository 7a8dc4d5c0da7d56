//! Staging store for Lorebook.
//!
//! An in-memory overlay that gives consumers immediate access to entity,
//! file and link state. Reads are synchronous and return a [`DataWrapper`]
//! (`Pending`, `Active`, `Deleted` or `Failure`); a read of an unseen key
//! schedules a fetch from the primary store (falling back to a remote
//! reader) and reports `Pending` until it settles.
//!
//! Local writes apply to memory at once and are flushed to the primary
//! store on demand. Every state transition is published as a
//! [`StagingEvent`].
//!
//! [`DataWrapper`]: lorebook_types::DataWrapper

mod contract;
mod event;
mod fetch;
mod state;
mod store;

pub use event::StagingEvent;
pub use store::{EntityState, FileState, LinksState, StagingStore};
