//! Stale server registration pruning.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::info;

use persistence::repositories::ServerRegistrationRepository;
use persistence::{Scope, ScopeNotification};

use super::locked::ScopedJob;
use super::scheduler::{JobContext, JobError};

/// Topic published when registrations are pruned.
pub const SERVERS_PRUNED_TOPIC: &str = "servers.pruned";

/// Deletes registrations of nodes that stopped sending heartbeats.
///
/// Wrap in a [`LockedJob`](super::LockedJob) on the `Servers` lock so only
/// one node prunes at a time.
pub struct ServerPruneJob {
    repo: ServerRegistrationRepository,
    stale_after: Duration,
}

impl ServerPruneJob {
    pub fn new(repo: ServerRegistrationRepository, stale_after: Duration) -> Self {
        Self { repo, stale_after }
    }
}

#[async_trait]
impl ScopedJob for ServerPruneJob {
    fn name(&self) -> &'static str {
        "server_prune"
    }

    fn default_period(&self) -> Duration {
        Duration::from_secs(300)
    }

    async fn execute_in_scope(&self, scope: &Scope, _ctx: &JobContext) -> Result<(), JobError> {
        let removed = self.repo.delete_stale(scope, self.stale_after).await?;

        if removed > 0 {
            info!(removed, stale_after_secs = self.stale_after.as_secs(), "Pruned stale server registrations");
            scope.publish(ScopeNotification::new(SERVERS_PRUNED_TOPIC, json!({ "removed": removed })));
        }
        Ok(())
    }
}
