//! Scope coordinator: nestable units of work over a single transaction.
//!
//! A [`Scope`] created by the [`ScopeProvider`] is an outermost scope; scopes
//! created from it with [`Scope::create_child`] join the same transaction.
//! Scopes form a stack and must be disposed innermost first. Only the
//! outermost disposal commits, and only if every scope in the stack was
//! completed; a single uncompleted scope rolls the whole transaction back.
//!
//! The transaction is opened lazily on the first call to
//! [`Scope::connection`], so scopes that never touch the database cost
//! nothing. A scope dropped without [`Scope::dispose`] counts as an
//! uncompleted disposal.

use serde::Serialize;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, MappedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use domain::models::LockMode;

use crate::metrics::record_scope_outcome;

const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

/// Scope coordinator errors.
#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Scope {0} is not the innermost open scope")]
    NotAmbient(Uuid),

    #[error("Nested scope cannot raise isolation from {parent} to {requested}")]
    IsolationMismatch {
        parent: IsolationLevel,
        requested: IsolationLevel,
    },

    #[error("Scope transaction is no longer available")]
    Closed,
}

/// Transaction isolation, ordered from weakest to strictest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn set_transaction_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
            IsolationLevel::RepeatableRead => "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
            IsolationLevel::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
        }
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IsolationLevel::ReadCommitted => write!(f, "read committed"),
            IsolationLevel::RepeatableRead => write!(f, "repeatable read"),
            IsolationLevel::Serializable => write!(f, "serializable"),
        }
    }
}

/// Whether a scope publishes the notifications raised inside it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NotificationMode {
    #[default]
    Publish,
    Suppress,
}

/// A notification raised inside a scope, delivered after commit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeNotification {
    pub topic: String,
    pub payload: serde_json::Value,
}

impl ScopeNotification {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// What a disposal did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeOutcome {
    /// Outermost scope, whole stack completed.
    Committed,
    /// Outermost scope, at least one scope in the stack was not completed.
    RolledBack,
    /// Nested scope; the decision is left to the outermost scope.
    Deferred,
}

/// State shared by every scope in one stack.
struct ScopeStack {
    pool: PgPool,
    isolation: IsolationLevel,
    transaction: tokio::sync::Mutex<Option<Transaction<'static, Postgres>>>,
    frames: Mutex<Vec<Uuid>>,
    spoiled: AtomicBool,
    held_locks: Mutex<HashMap<String, LockMode>>,
    queued: Mutex<Vec<ScopeNotification>>,
    publisher: broadcast::Sender<ScopeNotification>,
}

impl ScopeStack {
    fn frames(&self) -> MutexGuard<'_, Vec<Uuid>> {
        self.frames.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn held_locks(&self) -> MutexGuard<'_, HashMap<String, LockMode>> {
        self.held_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn queued(&self) -> MutexGuard<'_, Vec<ScopeNotification>> {
        self.queued.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Creates outermost scopes.
#[derive(Clone)]
pub struct ScopeProvider {
    pool: PgPool,
    publisher: broadcast::Sender<ScopeNotification>,
}

impl ScopeProvider {
    pub fn new(pool: PgPool) -> Self {
        let (publisher, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        Self { pool, publisher }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Receive notifications published by committed scopes.
    pub fn subscribe(&self) -> broadcast::Receiver<ScopeNotification> {
        self.publisher.subscribe()
    }

    /// Start a new outermost scope.
    pub fn create_scope(&self, isolation: IsolationLevel, notifications: NotificationMode) -> Scope {
        let id = Uuid::new_v4();
        let stack = Arc::new(ScopeStack {
            pool: self.pool.clone(),
            isolation,
            transaction: tokio::sync::Mutex::new(None),
            frames: Mutex::new(vec![id]),
            spoiled: AtomicBool::new(false),
            held_locks: Mutex::new(HashMap::new()),
            queued: Mutex::new(Vec::new()),
            publisher: self.publisher.clone(),
        });

        debug!(scope_id = %id, isolation = %isolation, "Scope created");
        Scope {
            id,
            parent_id: None,
            depth: 0,
            notifications,
            completed: false,
            disposed: false,
            stack,
        }
    }
}

/// One frame of a unit of work.
pub struct Scope {
    id: Uuid,
    parent_id: Option<Uuid>,
    depth: usize,
    notifications: NotificationMode,
    completed: bool,
    disposed: bool,
    stack: Arc<ScopeStack>,
}

impl Scope {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn parent_id(&self) -> Option<Uuid> {
        self.parent_id
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_outermost(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.stack.isolation
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Join this scope's transaction with a nested scope of the same isolation.
    pub fn create_child(&self, notifications: NotificationMode) -> Scope {
        self.spawn_child(notifications)
    }

    /// Join this scope's transaction, asserting the isolation it needs.
    ///
    /// A nested scope may ask for weaker isolation than the running
    /// transaction but never for stricter.
    pub fn create_child_with(
        &self,
        isolation: IsolationLevel,
        notifications: NotificationMode,
    ) -> Result<Scope, ScopeError> {
        if isolation > self.stack.isolation {
            return Err(ScopeError::IsolationMismatch {
                parent: self.stack.isolation,
                requested: isolation,
            });
        }
        Ok(self.spawn_child(notifications))
    }

    /// A suppressing scope suppresses for every scope nested inside it.
    fn spawn_child(&self, notifications: NotificationMode) -> Scope {
        let notifications = match self.notifications {
            NotificationMode::Suppress => NotificationMode::Suppress,
            NotificationMode::Publish => notifications,
        };
        let id = Uuid::new_v4();
        self.stack.frames().push(id);
        Scope {
            id,
            parent_id: Some(self.id),
            depth: self.depth + 1,
            notifications,
            completed: false,
            disposed: false,
            stack: Arc::clone(&self.stack),
        }
    }

    /// Mark this scope as eligible to commit.
    pub fn complete(&mut self) {
        self.completed = true;
    }

    /// The transaction shared by this scope stack, opened on first use.
    pub async fn connection(&self) -> Result<MappedMutexGuard<'_, PgConnection>, ScopeError> {
        let mut guard = self.stack.transaction.lock().await;
        if guard.is_none() {
            let mut transaction = self.stack.pool.begin().await?;
            sqlx::query(self.stack.isolation.set_transaction_sql())
                .execute(&mut *transaction)
                .await?;
            debug!(scope_id = %self.id, "Scope transaction opened");
            *guard = Some(transaction);
        }

        tokio::sync::MutexGuard::try_map(guard, |transaction| {
            transaction.as_mut().map(|transaction| &mut **transaction)
        })
        .map_err(|_| ScopeError::Closed)
    }

    /// Queue a notification for delivery when the outermost scope commits.
    pub fn publish(&self, notification: ScopeNotification) {
        if self.notifications == NotificationMode::Suppress {
            debug!(scope_id = %self.id, topic = %notification.topic, "Notification suppressed");
            return;
        }
        self.stack.queued().push(notification);
    }

    pub(crate) fn held_lock(&self, name: &str) -> Option<LockMode> {
        self.stack.held_locks().get(name).copied()
    }

    pub(crate) fn record_lock(&self, name: &str, mode: LockMode) {
        let mut held = self.stack.held_locks();
        let entry = held.entry(name.to_string()).or_insert(mode);
        if mode > *entry {
            *entry = mode;
        }
    }

    /// Close this scope.
    ///
    /// Nested scopes only record whether they completed. The outermost scope
    /// commits when the whole stack completed and rolls back otherwise; held
    /// named locks are released with the transaction either way.
    pub async fn dispose(mut self) -> Result<ScopeOutcome, ScopeError> {
        {
            let mut frames = self.stack.frames();
            if frames.last() != Some(&self.id) {
                return Err(ScopeError::NotAmbient(self.id));
            }
            frames.pop();
        }
        self.disposed = true;

        if !self.completed {
            self.stack.spoiled.store(true, Ordering::Release);
        }

        if !self.is_outermost() {
            return Ok(ScopeOutcome::Deferred);
        }

        let transaction = self.stack.transaction.lock().await.take();
        let queued = std::mem::take(&mut *self.stack.queued());
        self.stack.held_locks().clear();

        if self.stack.spoiled.load(Ordering::Acquire) {
            if let Some(transaction) = transaction {
                transaction.rollback().await?;
            }
            debug!(scope_id = %self.id, dropped_notifications = queued.len(), "Scope rolled back");
            record_scope_outcome("rolled_back");
            return Ok(ScopeOutcome::RolledBack);
        }

        if let Some(transaction) = transaction {
            transaction.commit().await?;
        }
        for notification in queued {
            // No subscribers is fine.
            let _ = self.stack.publisher.send(notification);
        }
        debug!(scope_id = %self.id, "Scope committed");
        record_scope_outcome("committed");
        Ok(ScopeOutcome::Committed)
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }

        self.stack.spoiled.store(true, Ordering::Release);
        self.stack.frames().retain(|frame| *frame != self.id);
        warn!(
            scope_id = %self.id,
            depth = self.depth,
            "Scope dropped without dispose, transaction will roll back"
        );
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("parent_id", &self.parent_id)
            .field("depth", &self.depth)
            .field("completed", &self.completed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    // Never connects: none of these tests touch the transaction.
    fn provider() -> ScopeProvider {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://farmhand@localhost/unused")
            .unwrap();
        ScopeProvider::new(pool)
    }

    #[tokio::test]
    async fn test_completed_stack_commits() {
        let provider = provider();
        let mut outer = provider.create_scope(IsolationLevel::default(), NotificationMode::Publish);
        let mut inner = outer.create_child(NotificationMode::Publish);

        inner.complete();
        assert_eq!(inner.dispose().await.unwrap(), ScopeOutcome::Deferred);
        outer.complete();
        assert_eq!(outer.dispose().await.unwrap(), ScopeOutcome::Committed);
    }

    #[tokio::test]
    async fn test_uncompleted_inner_spoils_completed_outer() {
        let provider = provider();
        let mut outer = provider.create_scope(IsolationLevel::default(), NotificationMode::Publish);
        let inner = outer.create_child(NotificationMode::Publish);

        assert_eq!(inner.dispose().await.unwrap(), ScopeOutcome::Deferred);
        outer.complete();
        assert_eq!(outer.dispose().await.unwrap(), ScopeOutcome::RolledBack);
    }

    #[tokio::test]
    async fn test_uncompleted_outer_rolls_back() {
        let provider = provider();
        let outer = provider.create_scope(IsolationLevel::default(), NotificationMode::Publish);
        let mut inner = outer.create_child(NotificationMode::Publish);

        inner.complete();
        inner.dispose().await.unwrap();
        assert_eq!(outer.dispose().await.unwrap(), ScopeOutcome::RolledBack);
    }

    #[tokio::test]
    async fn test_dropped_child_spoils_stack() {
        let provider = provider();
        let mut outer = provider.create_scope(IsolationLevel::default(), NotificationMode::Publish);
        {
            let mut inner = outer.create_child(NotificationMode::Publish);
            inner.complete();
            // Dropped without dispose, as on an early return.
        }
        outer.complete();
        assert_eq!(outer.dispose().await.unwrap(), ScopeOutcome::RolledBack);
    }

    #[tokio::test]
    async fn test_out_of_order_dispose_is_rejected() {
        let provider = provider();
        let outer = provider.create_scope(IsolationLevel::default(), NotificationMode::Publish);
        let _inner = outer.create_child(NotificationMode::Publish);

        let outer_id = outer.id();
        let result = outer.dispose().await;
        assert!(matches!(result, Err(ScopeError::NotAmbient(id)) if id == outer_id));
    }

    #[tokio::test]
    async fn test_child_cannot_raise_isolation() {
        let provider = provider();
        let outer = provider.create_scope(IsolationLevel::RepeatableRead, NotificationMode::Publish);

        let weaker = tokio_test::assert_ok!(
            outer.create_child_with(IsolationLevel::ReadCommitted, NotificationMode::Publish)
        );
        weaker.dispose().await.unwrap();

        let stricter = outer.create_child_with(IsolationLevel::Serializable, NotificationMode::Publish);
        assert!(matches!(stricter, Err(ScopeError::IsolationMismatch { .. })));
    }

    #[tokio::test]
    async fn test_notifications_published_only_on_commit() {
        let provider = provider();
        let mut receiver = provider.subscribe();

        let mut outer = provider.create_scope(IsolationLevel::default(), NotificationMode::Publish);
        let mut quiet = outer.create_child(NotificationMode::Suppress);
        quiet.publish(ScopeNotification::new("cache.refreshed", serde_json::json!({"quiet": true})));
        quiet.complete();
        quiet.dispose().await.unwrap();

        outer.publish(ScopeNotification::new("servers.pruned", serde_json::json!({"count": 2})));
        outer.complete();
        outer.dispose().await.unwrap();

        let received = receiver.try_recv().unwrap();
        assert_eq!(received.topic, "servers.pruned");
        assert!(receiver.try_recv().is_err());

        let rolled_back = provider.create_scope(IsolationLevel::default(), NotificationMode::Publish);
        rolled_back.publish(ScopeNotification::new("never", serde_json::Value::Null));
        assert_eq!(rolled_back.dispose().await.unwrap(), ScopeOutcome::RolledBack);
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_suppression_covers_nested_scopes() {
        let provider = provider();
        let mut receiver = provider.subscribe();

        let mut outer = provider.create_scope(IsolationLevel::default(), NotificationMode::Suppress);
        let mut inner = outer.create_child(NotificationMode::Publish);
        let mut innermost = inner.create_child(NotificationMode::Publish);
        innermost.publish(ScopeNotification::new("servers.pruned", serde_json::json!({"count": 1})));
        inner.publish(ScopeNotification::new("cache.refreshed", serde_json::Value::Null));

        innermost.complete();
        innermost.dispose().await.unwrap();
        inner.complete();
        inner.dispose().await.unwrap();
        outer.complete();
        assert_eq!(outer.dispose().await.unwrap(), ScopeOutcome::Committed);

        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_depth_and_parent_links() {
        let provider = provider();
        let outer = provider.create_scope(IsolationLevel::default(), NotificationMode::Publish);
        let inner = outer.create_child(NotificationMode::Publish);

        assert!(outer.is_outermost());
        assert_eq!(inner.parent_id(), Some(outer.id()));
        assert_eq!(inner.depth(), 1);

        inner.dispose().await.unwrap();
        outer.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_bookkeeping_keeps_strongest_mode() {
        let provider = provider();
        let outer = provider.create_scope(IsolationLevel::default(), NotificationMode::Publish);
        let inner = outer.create_child(NotificationMode::Publish);

        inner.record_lock("Servers", LockMode::Write);
        outer.record_lock("Servers", LockMode::Read);
        assert_eq!(outer.held_lock("Servers"), Some(LockMode::Write));
        assert_eq!(outer.held_lock("KeyValues"), None);

        inner.dispose().await.unwrap();
        outer.dispose().await.unwrap();
    }
}
