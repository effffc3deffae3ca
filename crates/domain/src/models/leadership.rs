//! Main-dom leadership state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Proof that this process instance holds main-dom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeadershipClaim {
    pub instance_id: Uuid,
    pub acquired_at: DateTime<Utc>,
}

impl LeadershipClaim {
    pub fn new(instance_id: Uuid, acquired_at: DateTime<Utc>) -> Self {
        Self {
            instance_id,
            acquired_at,
        }
    }
}

/// Main-dom lifecycle: `Unclaimed -> Claiming -> Owned -> Released`.
///
/// A failed claim falls back to `Unclaimed` and stays there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MainDomState {
    Unclaimed,
    Claiming,
    Owned,
    Released,
}

impl MainDomState {
    pub fn is_owned(self) -> bool {
        self == MainDomState::Owned
    }
}
