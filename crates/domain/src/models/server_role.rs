//! Server role within a load-balanced farm.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The role this node plays in the farm.
///
/// Resolved once at startup and read-only for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerRole {
    /// Role could not be determined. Never runs scheduled work.
    #[default]
    Unknown,
    /// The only server; not load balanced.
    Single,
    /// Load balanced, and the node that runs scheduled work.
    SchedulingPublisher,
    /// Load balanced, receives work from the publisher but never schedules.
    Subscriber,
}

impl ServerRole {
    /// Whether scheduled, farm-unique work may run on a node with this role.
    pub fn runs_scheduled_work(self) -> bool {
        matches!(self, ServerRole::Single | ServerRole::SchedulingPublisher)
    }

    /// Whether the role is known at all.
    pub fn is_known(self) -> bool {
        self != ServerRole::Unknown
    }
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerRole::Unknown => write!(f, "unknown"),
            ServerRole::Single => write!(f, "single"),
            ServerRole::SchedulingPublisher => write!(f, "scheduling_publisher"),
            ServerRole::Subscriber => write!(f, "subscriber"),
        }
    }
}

/// Error returned when a role name cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown server role: {0}")]
pub struct ParseServerRoleError(pub String);

impl FromStr for ServerRole {
    type Err = ParseServerRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "unknown" => Ok(ServerRole::Unknown),
            "single" => Ok(ServerRole::Single),
            "schedulingpublisher" | "master" => Ok(ServerRole::SchedulingPublisher),
            "subscriber" | "replica" => Ok(ServerRole::Subscriber),
            _ => Err(ParseServerRoleError(s.to_string())),
        }
    }
}
