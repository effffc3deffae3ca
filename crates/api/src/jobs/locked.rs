//! Jobs that run inside a scope holding a named lock.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use domain::models::{LockId, LockMode, RoleRequirement};
use persistence::{DistributedLockRepository, IsolationLevel, NotificationMode, Scope, ScopeProvider};

use super::scheduler::{Job, JobContext, JobError};

/// A job body that needs a scope.
#[async_trait]
pub trait ScopedJob: Send + Sync {
    fn name(&self) -> &'static str;

    fn default_period(&self) -> Duration;

    fn role_requirement(&self) -> RoleRequirement {
        RoleRequirement::SchedulingRole
    }

    async fn execute_in_scope(&self, scope: &Scope, ctx: &JobContext) -> Result<(), JobError>;
}

/// Runs a [`ScopedJob`] with a named lock held for the scope's lifetime.
///
/// The lock is taken without waiting. When another node holds it, the tick
/// is skipped rather than queued behind the holder: `execute` returns
/// [`JobError::Skipped`] and the runner records no last run.
pub struct LockedJob<J> {
    inner: J,
    lock: LockId,
    mode: LockMode,
    scopes: ScopeProvider,
    locks: DistributedLockRepository,
}

impl<J: ScopedJob> LockedJob<J> {
    pub fn new(inner: J, lock: LockId, mode: LockMode, scopes: ScopeProvider, locks: DistributedLockRepository) -> Self {
        Self {
            inner,
            lock,
            mode,
            scopes,
            locks,
        }
    }
}

#[async_trait]
impl<J: ScopedJob> Job for LockedJob<J> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn default_period(&self) -> Duration {
        self.inner.default_period()
    }

    fn role_requirement(&self) -> RoleRequirement {
        self.inner.role_requirement()
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let mut scope = self.scopes.create_scope(IsolationLevel::ReadCommitted, NotificationMode::Publish);

        let acquired = match self.locks.try_acquire_lock(&scope, self.lock.name, self.mode).await {
            Ok(acquired) => acquired,
            Err(e) => {
                discard(scope, self.inner.name()).await;
                return Err(e.into());
            }
        };

        if !acquired {
            debug!(job = self.inner.name(), lock = %self.lock, "Lock held elsewhere, skipping tick");
            discard(scope, self.inner.name()).await;
            return Err(JobError::Skipped(format!("lock {} held elsewhere", self.lock)));
        }

        match self.inner.execute_in_scope(&scope, ctx).await {
            Ok(()) => {
                scope.complete();
                scope.dispose().await?;
                Ok(())
            }
            Err(e) => {
                discard(scope, self.inner.name()).await;
                Err(e)
            }
        }
    }
}

/// Dispose an uncompleted scope, rolling back its work.
async fn discard(scope: Scope, job: &'static str) {
    if let Err(e) = scope.dispose().await {
        warn!(job, error = %e, "Could not dispose scope");
    }
}
