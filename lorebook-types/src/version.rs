//! Version numbers used for last-write-wins reconciliation.
//!
//! A version is a plain `i64`. Locally produced versions are wall-clock
//! milliseconds, bumped by one whenever the clock has not advanced since the
//! previous tick, so a single clock never hands out the same value twice.
//! There is no causal history: the larger version simply wins.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Version marker attached to every index entry.
pub type Version = i64;

/// Version reported for keys that have never been seen by a store.
pub const NO_VERSION: Version = -1;

/// Monotonic version source.
#[derive(Debug, Default)]
pub struct VersionClock {
    last: AtomicI64,
}

impl VersionClock {
    /// Creates a clock that starts from the current wall time.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a clock that never hands out a version `<= floor`.
    #[must_use]
    pub fn starting_after(floor: Version) -> Self {
        Self {
            last: AtomicI64::new(floor),
        }
    }

    /// Returns the next version.
    pub fn tick(&self) -> Version {
        let now = wall_millis();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = if now > prev { now } else { prev + 1 };
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }

    /// Advances the clock past a version observed elsewhere.
    pub fn observe(&self, seen: Version) {
        self.last.fetch_max(seen, Ordering::AcqRel);
    }

    /// Returns the last version handed out (or observed).
    #[must_use]
    pub fn last(&self) -> Version {
        self.last.load(Ordering::Acquire)
    }
}

fn wall_millis() -> Version {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Version)
        .unwrap_or(0)
}
