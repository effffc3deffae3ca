//! Farm topology probe backed by server registrations.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use domain::models::ServerRole;
use domain::services::{ProbeError, TopologyProbe};

use crate::repositories::ServerRegistrationRepository;

/// Elects the scheduling publisher from the registration table.
///
/// The probe refreshes this server's own registration, then treats the
/// oldest registration seen within the window as the publisher.
pub struct DatabaseElectionProbe {
    repo: ServerRegistrationRepository,
    identity: String,
    address: String,
    window: Duration,
}

impl DatabaseElectionProbe {
    pub fn new(
        repo: ServerRegistrationRepository,
        identity: impl Into<String>,
        address: impl Into<String>,
        window: Duration,
    ) -> Self {
        Self {
            repo,
            identity: identity.into(),
            address: address.into(),
            window,
        }
    }
}

#[async_trait]
impl TopologyProbe for DatabaseElectionProbe {
    async fn probe(&self) -> Result<ServerRole, ProbeError> {
        self.repo
            .touch(&self.identity, &self.address)
            .await
            .map_err(|e| ProbeError(e.to_string()))?;

        let active = self
            .repo
            .list_active(self.window)
            .await
            .map_err(|e| ProbeError(e.to_string()))?;

        let role = elect(&self.identity, active.iter().map(|r| r.identity.as_str()));
        debug!(identity = %self.identity, active = active.len(), role = %role, "Election probe finished");
        Ok(role)
    }
}

/// Role of `identity` given active identities ordered oldest first.
fn elect<'a>(identity: &str, mut active: impl Iterator<Item = &'a str>) -> ServerRole {
    match active.next() {
        Some(oldest) if oldest == identity => ServerRole::SchedulingPublisher,
        Some(_) => ServerRole::Subscriber,
        None => ServerRole::Unknown,
    }
}
