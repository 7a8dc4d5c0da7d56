//! Core type definitions for Lorebook.
//!
//! This crate defines the value types shared by every other crate:
//! - Entity, link-endpoint and canonical link-pair identifiers
//! - Index entries (entity/file/link) with status and version
//! - The `DataWrapper` state handed to consumers of the staging store
//! - `StoreState`, the full index snapshot exchanged during reconciliation
//! - The monotonic version clock
//!
//! Entity content is arbitrary JSON; its shape belongs to the field
//! configuration layer, not here.

mod ids;
mod index;
mod version;
mod wrapper;

pub use ids::{EntityId, EntityLinkPair, EntityLinkReference};
pub use index::{EntityIndex, EntityLink, EntityLinkResult, FileIndex, ItemStatus, StoreIndex, StoreState};
pub use version::{NO_VERSION, Version, VersionClock};
pub use wrapper::DataWrapper;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid entity id: {0}")]
    InvalidId(String),
}
