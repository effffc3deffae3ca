//! Run gate for recurring jobs.
//!
//! A job may run only when all of these hold: it is enabled, the server
//! role permits it, this instance is main-dom and the application is fully
//! running. The gate is a plain predicate; a closed gate is a steady state,
//! not an error.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use domain::models::{RoleRequirement, RuntimeLevel, RuntimeState, ServerRole};
use domain::services::MainDom;

/// Why a job may or may not run right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Open,
    Disabled,
    RoleNotPermitted,
    NotMainDom,
    NotRunning,
}

impl GateDecision {
    pub fn is_open(self) -> bool {
        self == GateDecision::Open
    }
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            GateDecision::Open => "open",
            GateDecision::Disabled => "disabled by configuration",
            GateDecision::RoleNotPermitted => "server role does not run this job",
            GateDecision::NotMainDom => "not main-dom",
            GateDecision::NotRunning => "application is not running",
        };
        f.write_str(reason)
    }
}

/// Inputs shared by every job's gate.
#[derive(Clone)]
pub struct JobGate {
    role: ServerRole,
    main_dom: Arc<MainDom>,
    runtime: Arc<RuntimeState>,
}

impl JobGate {
    pub fn new(role: ServerRole, main_dom: Arc<MainDom>, runtime: Arc<RuntimeState>) -> Self {
        Self {
            role,
            main_dom,
            runtime,
        }
    }

    pub fn role(&self) -> ServerRole {
        self.role
    }

    pub fn main_dom(&self) -> &Arc<MainDom> {
        &self.main_dom
    }

    pub fn runtime_level(&self) -> RuntimeLevel {
        self.runtime.level()
    }

    /// Evaluate the gate for one job.
    pub fn evaluate(&self, enabled: bool, requirement: RoleRequirement) -> GateDecision {
        if !enabled {
            GateDecision::Disabled
        } else if !requirement.permits(self.role) {
            GateDecision::RoleNotPermitted
        } else if !self.main_dom.is_main_dom() {
            GateDecision::NotMainDom
        } else if !self.runtime.is_running() {
            GateDecision::NotRunning
        } else {
            GateDecision::Open
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::services::LocalMainDomLock;
    use std::time::Duration;

    async fn gate(role: ServerRole, main: bool, level: RuntimeLevel) -> JobGate {
        let main_dom = Arc::new(MainDom::new(Arc::new(LocalMainDomLock::new()), Duration::from_secs(1)));
        if main {
            assert!(main_dom.acquire().await);
        }
        let runtime = Arc::new(RuntimeState::new(level));
        JobGate::new(role, main_dom, runtime)
    }

    #[tokio::test]
    async fn test_open_when_every_condition_holds() {
        let gate = gate(ServerRole::Single, true, RuntimeLevel::Run).await;
        assert_eq!(gate.evaluate(true, RoleRequirement::SchedulingRole), GateDecision::Open);
    }

    #[tokio::test]
    async fn test_disabled_wins() {
        let gate = gate(ServerRole::Single, true, RuntimeLevel::Run).await;
        assert_eq!(gate.evaluate(false, RoleRequirement::SchedulingRole), GateDecision::Disabled);
    }

    #[tokio::test]
    async fn test_subscriber_and_unknown_are_closed() {
        for role in [ServerRole::Subscriber, ServerRole::Unknown] {
            let gate = gate(role, true, RuntimeLevel::Run).await;
            assert_eq!(
                gate.evaluate(true, RoleRequirement::SchedulingRole),
                GateDecision::RoleNotPermitted
            );
        }
    }

    #[tokio::test]
    async fn test_housekeeping_runs_on_subscriber_but_not_unknown() {
        let subscriber = gate(ServerRole::Subscriber, true, RuntimeLevel::Run).await;
        assert!(subscriber.evaluate(true, RoleRequirement::AnyKnownRole).is_open());

        let unknown = gate(ServerRole::Unknown, true, RuntimeLevel::Run).await;
        assert!(!unknown.evaluate(true, RoleRequirement::AnyKnownRole).is_open());
    }

    #[tokio::test]
    async fn test_not_main_dom() {
        let gate = gate(ServerRole::Single, false, RuntimeLevel::Run).await;
        assert_eq!(gate.evaluate(true, RoleRequirement::SchedulingRole), GateDecision::NotMainDom);
    }

    #[tokio::test]
    async fn test_not_running_while_booting_or_upgrading() {
        for level in [RuntimeLevel::Boot, RuntimeLevel::Install, RuntimeLevel::Upgrade, RuntimeLevel::BootFailed] {
            let gate = gate(ServerRole::Single, true, level).await;
            assert_eq!(gate.evaluate(true, RoleRequirement::SchedulingRole), GateDecision::NotRunning);
        }
    }
}
