//! Named distributed locks.
//!
//! Each lock is a pre-provisioned row; holding it means holding a row lock
//! on it for the lifetime of a database transaction.

use serde::Serialize;
use std::fmt;

/// Stable identity of a named lock row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct LockId {
    pub id: i32,
    pub name: &'static str,
}

impl LockId {
    pub const SERVERS: LockId = LockId::new(-331, "Servers");
    pub const KEY_VALUES: LockId = LockId::new(-339, "KeyValues");
    pub const SCHEDULED_PUBLISHING: LockId = LockId::new(-341, "ScheduledPublishing");
    pub const CACHE_VERSION: LockId = LockId::new(-345, "CacheVersion");
    pub const DISTRIBUTED_JOBS: LockId = LockId::new(-347, "DistributedJobs");
    pub const MAIN_DOM: LockId = LockId::new(-1000, "MainDom");

    pub const fn new(id: i32, name: &'static str) -> Self {
        Self { id, name }
    }

    /// Look up a well-known lock by name.
    pub fn by_name(name: &str) -> Option<LockId> {
        WELL_KNOWN_LOCKS.iter().copied().find(|lock| lock.name == name)
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Every lock the bootstrap step provisions.
pub const WELL_KNOWN_LOCKS: &[LockId] = &[
    LockId::SERVERS,
    LockId::KEY_VALUES,
    LockId::SCHEDULED_PUBLISHING,
    LockId::CACHE_VERSION,
    LockId::DISTRIBUTED_JOBS,
    LockId::MAIN_DOM,
];

/// How a lock row is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Shared; blocks writers only.
    Read,
    /// Exclusive.
    Write,
}

impl LockMode {
    /// Whether a lock already held in `self` mode covers a request for `requested`.
    pub fn covers(self, requested: LockMode) -> bool {
        self >= requested
    }
}
