//! Recurring job registration records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::ServerRole;

/// Registration record for a recurring background job.
///
/// Identity is the unique `name`. `last_run` is written by the runner after
/// each successful invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub name: String,
    #[serde(with = "duration_secs")]
    pub period: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_run_time: Option<String>,
    pub last_run: Option<DateTime<Utc>>,
}

impl JobDescriptor {
    pub fn new(name: impl Into<String>, period: Duration, first_run_time: Option<String>) -> Self {
        Self {
            name: name.into(),
            period,
            first_run_time,
            last_run: None,
        }
    }
}

/// Which server roles a job may run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoleRequirement {
    /// Only on `Single` or `SchedulingPublisher` nodes.
    #[default]
    SchedulingRole,
    /// On every node whose role is known (per-node housekeeping).
    AnyKnownRole,
}

impl RoleRequirement {
    pub fn permits(self, role: ServerRole) -> bool {
        match self {
            RoleRequirement::SchedulingRole => role.runs_scheduled_work(),
            RoleRequirement::AnyKnownRole => role.is_known(),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
