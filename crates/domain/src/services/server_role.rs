//! Server role classification.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::ServerRole;

/// Error raised by a topology probe.
#[derive(Debug, thiserror::Error)]
#[error("Topology probe failed: {0}")]
pub struct ProbeError(pub String);

/// Discovers this node's role from the farm topology.
#[async_trait]
pub trait TopologyProbe: Send + Sync {
    async fn probe(&self) -> Result<ServerRole, ProbeError>;
}

/// Inputs used to resolve the role at startup.
#[derive(Debug, Clone, Default)]
pub struct ServerRoleSettings {
    /// Explicit role from configuration; wins over everything else.
    pub explicit_role: Option<ServerRole>,
    /// Whether the application sits behind a load balancer.
    pub load_balanced: bool,
}

/// Resolves and holds this node's role for the process lifetime.
#[derive(Debug, Clone, Copy)]
pub struct ServerRoleClassifier {
    role: ServerRole,
}

impl ServerRoleClassifier {
    /// Resolve the role once.
    ///
    /// Order: explicit configuration, then `Single` when not load balanced,
    /// then the topology probe. A missing or failing probe yields `Unknown`.
    pub async fn resolve(settings: &ServerRoleSettings, probe: Option<&dyn TopologyProbe>) -> Self {
        let role = if let Some(role) = settings.explicit_role {
            info!(role = %role, "Server role set by configuration");
            role
        } else if !settings.load_balanced {
            ServerRole::Single
        } else {
            match probe {
                Some(probe) => match probe.probe().await {
                    Ok(role) => role,
                    Err(e) => {
                        warn!(error = %e, "Could not determine server role, scheduled work is disabled");
                        ServerRole::Unknown
                    }
                },
                None => {
                    warn!("Load balanced without a role or topology probe, scheduled work is disabled");
                    ServerRole::Unknown
                }
            }
        };

        info!(role = %role, "Server role resolved");
        Self { role }
    }

    /// A classifier pinned to a fixed role.
    pub fn fixed(role: ServerRole) -> Self {
        Self { role }
    }

    pub fn current_server_role(&self) -> ServerRole {
        self.role
    }
}
