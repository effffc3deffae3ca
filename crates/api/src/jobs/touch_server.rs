//! Server heartbeat job.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use domain::models::RoleRequirement;
use persistence::repositories::ServerRegistrationRepository;

use super::scheduler::{Job, JobContext, JobError};

/// Refreshes this node's row in `server_registrations`.
pub struct TouchServerJob {
    repo: ServerRegistrationRepository,
    identity: String,
    address: String,
}

impl TouchServerJob {
    pub fn new(repo: ServerRegistrationRepository, identity: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            repo,
            identity: identity.into(),
            address: address.into(),
        }
    }
}

#[async_trait]
impl Job for TouchServerJob {
    fn name(&self) -> &'static str {
        "touch_server"
    }

    fn default_period(&self) -> Duration {
        Duration::from_secs(60)
    }

    fn role_requirement(&self) -> RoleRequirement {
        RoleRequirement::AnyKnownRole
    }

    async fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
        let registration = self.repo.touch(&self.identity, &self.address).await?;
        debug!(
            identity = %registration.identity,
            last_seen_at = %registration.last_seen_at,
            "Server heartbeat recorded"
        );
        Ok(())
    }
}
