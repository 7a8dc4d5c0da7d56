//! Change notifications.

use crate::store::{EntityState, FileState, LinksState};
use lorebook_types::{EntityLinkPair, ItemStatus, Version};

/// One state transition inside the staging store.
///
/// Events are sent after the change is applied. A consumer that
/// re-reads on receipt always sees the new value.
#[derive(Debug, Clone, PartialEq)]
pub enum StagingEvent {
    Entity(EntityState),
    File(FileState),
    /// The link set of an entity was loaded or failed to load.
    Links(LinksState),
    Link {
        pair: EntityLinkPair,
        status: ItemStatus,
        version: Version,
    },
}
