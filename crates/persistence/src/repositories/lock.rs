//! Named lock store.
//!
//! A named lock is held by taking a row lock on its pre-provisioned row in
//! the `locks` table, inside a scope's transaction. It is released when the
//! outermost scope commits or rolls back. Rows are never created lazily: a
//! missing row means provisioning was skipped and is reported as
//! [`LockError::NotFound`].
//!
//! Each attempt runs under a savepoint so a timed-out or contended attempt
//! leaves the enclosing transaction usable.

use sqlx::{PgConnection, PgPool};
use std::time::{Duration, Instant};
use tracing::{debug, error};

use domain::models::{LockId, LockMode};

use crate::entities::LockEntity;
use crate::metrics::{record_lock_wait, QueryTimer};
use crate::scope::{Scope, ScopeError};

const SAVEPOINT: &str = "SAVEPOINT farmhand_named_lock";
const RELEASE_SAVEPOINT: &str = "RELEASE SAVEPOINT farmhand_named_lock";
const ROLLBACK_SAVEPOINT: &str = "ROLLBACK TO SAVEPOINT farmhand_named_lock";

/// SQLSTATE raised by `lock_timeout` expiry and `NOWAIT` contention.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Named lock errors.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Lock not found: {0} (was lock provisioning skipped?)")]
    NotFound(String),

    #[error("Timed out after {waited_ms}ms waiting for lock {name}")]
    Timeout { name: String, waited_ms: u64 },

    #[error(transparent)]
    Scope(#[from] ScopeError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy)]
enum Wait {
    Bounded(Duration),
    NoWait,
}

/// Repository for named lock rows.
#[derive(Clone)]
pub struct DistributedLockRepository {
    pool: PgPool,
    lock_timeout: Duration,
}

impl DistributedLockRepository {
    /// Creates a new repository; blocking acquisitions wait at most `lock_timeout`.
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Acquire `name` in `mode` for the lifetime of the scope's transaction.
    ///
    /// Blocks while another transaction holds a conflicting lock, up to the
    /// configured lock timeout.
    pub async fn acquire_lock(&self, scope: &Scope, name: &str, mode: LockMode) -> Result<(), LockError> {
        self.acquire(scope, name, mode, Wait::Bounded(self.lock_timeout))
            .await
            .map(|_| ())
    }

    /// Acquire `name` without waiting. Returns `false` when another
    /// transaction holds a conflicting lock.
    pub async fn try_acquire_lock(&self, scope: &Scope, name: &str, mode: LockMode) -> Result<bool, LockError> {
        self.acquire(scope, name, mode, Wait::NoWait).await
    }

    async fn acquire(&self, scope: &Scope, name: &str, mode: LockMode, wait: Wait) -> Result<bool, LockError> {
        if scope.held_lock(name).is_some_and(|held| held.covers(mode)) {
            debug!(lock = name, mode = ?mode, "Lock already held by this scope");
            return Ok(true);
        }

        let started = Instant::now();
        let mut conn = scope.connection().await?;

        sqlx::query(SAVEPOINT).execute(&mut *conn).await?;
        if let Wait::Bounded(timeout) = wait {
            sqlx::query("SELECT set_config('lock_timeout', $1, true)")
                .bind(format!("{}ms", timeout.as_millis().max(1)))
                .execute(&mut *conn)
                .await?;
        }

        let locked = sqlx::query_scalar::<_, i32>(lock_statement(mode, wait))
            .bind(name)
            .fetch_optional(&mut *conn)
            .await;
        let waited = started.elapsed();

        match locked {
            Ok(Some(_)) => {
                if matches!(wait, Wait::Bounded(_)) {
                    sqlx::query("SET LOCAL lock_timeout TO DEFAULT")
                        .execute(&mut *conn)
                        .await?;
                }
                sqlx::query(RELEASE_SAVEPOINT).execute(&mut *conn).await?;
                drop(conn);

                scope.record_lock(name, mode);
                record_lock_wait(name, "acquired", waited);
                debug!(lock = name, mode = ?mode, waited_ms = waited.as_millis() as u64, "Lock acquired");
                Ok(true)
            }
            Ok(None) => {
                undo_attempt(&mut conn).await?;
                record_lock_wait(name, "not_found", waited);
                error!(lock = name, "Lock row missing, provisioning was skipped");
                Err(LockError::NotFound(name.to_string()))
            }
            Err(e) if is_lock_not_available(&e) => {
                undo_attempt(&mut conn).await?;
                match wait {
                    Wait::NoWait => {
                        record_lock_wait(name, "contended", waited);
                        debug!(lock = name, "Lock held elsewhere");
                        Ok(false)
                    }
                    Wait::Bounded(_) => {
                        record_lock_wait(name, "timeout", waited);
                        Err(LockError::Timeout {
                            name: name.to_string(),
                            waited_ms: waited.as_millis() as u64,
                        })
                    }
                }
            }
            Err(e) => {
                // Report the lock error, not a failed rollback.
                let _ = undo_attempt(&mut conn).await;
                Err(e.into())
            }
        }
    }

    /// Whether the row for `lock` exists.
    pub async fn exists(&self, lock: LockId) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("lock_exists");
        let result = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM locks WHERE id = $1)")
            .bind(lock.id)
            .fetch_one(&self.pool)
            .await;
        timer.record();
        result
    }

    /// Insert the row for `lock`. Callers check [`Self::exists`] first.
    pub async fn insert(&self, lock: LockId) -> Result<(), sqlx::Error> {
        let timer = QueryTimer::new("insert_lock");
        let result = sqlx::query("INSERT INTO locks (id, name) VALUES ($1, $2)")
            .bind(lock.id)
            .bind(lock.name)
            .execute(&self.pool)
            .await;
        timer.record();
        result.map(|_| ())
    }

    /// All provisioned lock rows, ordered by id.
    pub async fn list(&self) -> Result<Vec<LockEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_locks");
        let result = sqlx::query_as::<_, LockEntity>("SELECT id, name FROM locks ORDER BY id")
            .fetch_all(&self.pool)
            .await;
        timer.record();
        result
    }
}

fn lock_statement(mode: LockMode, wait: Wait) -> &'static str {
    match (mode, wait) {
        (LockMode::Write, Wait::Bounded(_)) => "SELECT id FROM locks WHERE name = $1 FOR UPDATE",
        (LockMode::Write, Wait::NoWait) => "SELECT id FROM locks WHERE name = $1 FOR UPDATE NOWAIT",
        (LockMode::Read, Wait::Bounded(_)) => "SELECT id FROM locks WHERE name = $1 FOR SHARE",
        (LockMode::Read, Wait::NoWait) => "SELECT id FROM locks WHERE name = $1 FOR SHARE NOWAIT",
    }
}

async fn undo_attempt(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    sqlx::query(ROLLBACK_SAVEPOINT).execute(&mut *conn).await?;
    sqlx::query(RELEASE_SAVEPOINT).execute(&mut *conn).await?;
    Ok(())
}

fn is_lock_not_available(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == LOCK_NOT_AVAILABLE)
}
