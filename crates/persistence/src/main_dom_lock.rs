//! Database-backed main-dom lock.
//!
//! Ownership lives in the `main_dom_claims` row for an application id. Every
//! read-modify-write of that row happens inside a scope holding the
//! `MainDom` named lock, so competing instances are serialized. A waiting
//! instance records itself in `requested_by`; the holder polls for that and
//! lets go. The newest requester wins: an instance whose request is
//! overwritten gives up.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use domain::models::{LockId, LockMode};
use domain::services::{MainDomError, MainDomLock};

use crate::repositories::{DistributedLockRepository, LockError, MainDomClaimRepository};
use crate::scope::{IsolationLevel, NotificationMode, ScopeProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Granted,
    Waiting,
    Superseded,
}

/// [`MainDomLock`] stored in PostgreSQL.
pub struct SqlMainDomLock {
    scopes: ScopeProvider,
    locks: DistributedLockRepository,
    claims: MainDomClaimRepository,
    app_id: String,
    poll_interval: Duration,
}

impl SqlMainDomLock {
    pub fn new(
        scopes: ScopeProvider,
        locks: DistributedLockRepository,
        claims: MainDomClaimRepository,
        app_id: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            scopes,
            locks,
            claims,
            app_id: app_id.into(),
            poll_interval,
        }
    }

    /// One serialized look at the claim row.
    ///
    /// `requested` tells whether this instance already registered its
    /// request; `force` takes over from an unresponsive holder.
    async fn step(&self, me: Uuid, requested: bool, force: bool) -> Result<Step, LockError> {
        let mut scope = self.scopes.create_scope(IsolationLevel::ReadCommitted, NotificationMode::Suppress);
        self.locks
            .acquire_lock(&scope, LockId::MAIN_DOM.name, LockMode::Write)
            .await?;

        let step = {
            let mut conn = scope.connection().await?;
            let claim = self.claims.ensure(&mut conn, &self.app_id).await?;
            let free = claim.holder_id.is_none() || claim.holder_id == Some(me);
            let pending_other = claim.requested_by.is_some_and(|requester| requester != me);

            if free && !(requested && pending_other) {
                self.claims.set_holder(&mut conn, &self.app_id, me).await?;
                Step::Granted
            } else if free || (requested && claim.requested_by != Some(me)) {
                Step::Superseded
            } else if !requested {
                self.claims.request(&mut conn, &self.app_id, me).await?;
                Step::Waiting
            } else if force {
                warn!(
                    app_id = %self.app_id,
                    holder = ?claim.holder_id,
                    "Main-dom holder did not release in time, taking over"
                );
                self.claims.set_holder(&mut conn, &self.app_id, me).await?;
                Step::Granted
            } else {
                Step::Waiting
            }
        };

        scope.complete();
        scope.dispose().await?;
        Ok(step)
    }
}

fn unavailable(e: impl std::fmt::Display) -> MainDomError {
    MainDomError::Unavailable(e.to_string())
}

#[async_trait]
impl MainDomLock for SqlMainDomLock {
    async fn acquire(&self, instance_id: Uuid, timeout: Duration) -> Result<bool, MainDomError> {
        let deadline = Instant::now() + timeout;

        match self.step(instance_id, false, false).await.map_err(unavailable)? {
            Step::Granted => return Ok(true),
            Step::Superseded => return Ok(false),
            Step::Waiting => debug!(app_id = %self.app_id, "Waiting for main-dom holder to release"),
        }

        loop {
            tokio::time::sleep(self.poll_interval).await;
            let force = Instant::now() >= deadline;
            match self.step(instance_id, true, force).await.map_err(unavailable)? {
                Step::Granted => return Ok(true),
                Step::Superseded => return Ok(false),
                Step::Waiting => {}
            }
        }
    }

    async fn listen(&self, instance_id: Uuid) -> Result<(), MainDomError> {
        loop {
            tokio::time::sleep(self.poll_interval).await;

            let claim = match self.claims.find(&self.app_id).await {
                Ok(claim) => claim,
                Err(e) => {
                    warn!(app_id = %self.app_id, error = %e, "Could not poll main-dom claim");
                    continue;
                }
            };

            let Some(claim) = claim else {
                return Err(unavailable("main-dom claim row disappeared"));
            };
            if claim.holder_id != Some(instance_id) {
                return Err(unavailable("main-dom was taken over"));
            }
            if claim.requested_by.is_some_and(|requester| requester != instance_id) {
                return Ok(());
            }
        }
    }

    async fn release(&self, instance_id: Uuid) -> Result<(), MainDomError> {
        let mut scope = self.scopes.create_scope(IsolationLevel::ReadCommitted, NotificationMode::Suppress);
        self.locks
            .acquire_lock(&scope, LockId::MAIN_DOM.name, LockMode::Write)
            .await
            .map_err(unavailable)?;

        let cleared = {
            let mut conn = scope.connection().await.map_err(unavailable)?;
            self.claims
                .clear_holder(&mut conn, &self.app_id, instance_id)
                .await
                .map_err(unavailable)?
        };

        scope.complete();
        scope.dispose().await.map_err(unavailable)?;
        debug!(app_id = %self.app_id, cleared, "Main-dom claim released");
        Ok(())
    }
}
