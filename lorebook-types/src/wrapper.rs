//! Tagged state of a fetched-or-staged value.

use crate::{NO_VERSION, Version};
use serde::{Deserialize, Serialize};

/// State of one entity, file or link collection as seen by consumers.
///
/// `Pending` means a fetch is in flight and no data is known yet.
/// `Failure` is terminal until the value is explicitly re-fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DataWrapper<T, I> {
    Pending { id: I },
    Active { id: I, data: T, version: Version },
    Deleted { id: I, version: Version },
    Failure { id: I, message: String },
}

impl<T, I> DataWrapper<T, I> {
    /// Deleted state for a key no store has ever seen.
    #[must_use]
    pub fn missing(id: I) -> Self {
        Self::Deleted {
            id,
            version: NO_VERSION,
        }
    }

    #[must_use]
    pub fn id(&self) -> &I {
        match self {
            Self::Pending { id }
            | Self::Active { id, .. }
            | Self::Deleted { id, .. }
            | Self::Failure { id, .. } => id,
        }
    }

    /// Returns the data if the value is active.
    #[must_use]
    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Active { data, .. } => Some(data),
            Self::Pending { .. } | Self::Deleted { .. } | Self::Failure { .. } => None,
        }
    }

    /// Returns the version for settled states.
    #[must_use]
    pub fn version(&self) -> Option<Version> {
        match self {
            Self::Active { version, .. } | Self::Deleted { version, .. } => Some(*version),
            Self::Pending { .. } | Self::Failure { .. } => None,
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted { .. })
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    /// Maps the active data, keeping every other state as-is.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> DataWrapper<U, I> {
        match self {
            Self::Pending { id } => DataWrapper::Pending { id },
            Self::Active { id, data, version } => DataWrapper::Active {
                id,
                data: f(data),
                version,
            },
            Self::Deleted { id, version } => DataWrapper::Deleted { id, version },
            Self::Failure { id, message } => DataWrapper::Failure { id, message },
        }
    }
}
