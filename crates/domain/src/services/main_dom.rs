//! Main-dom: at most one process instance per machine owns background work.
//!
//! A new instance asks the [`MainDomLock`] for ownership. The current owner
//! is signalled, runs its release callbacks and lets go; if it does not let
//! go within the claim timeout the new instance takes over anyway so that a
//! hung predecessor cannot block a deployment.

use async_trait::async_trait;
use chrono::Utc;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{LeadershipClaim, MainDomState};

/// Callback run when main-dom is released.
pub type ReleaseCallback = Box<dyn FnOnce() + Send + 'static>;

/// Main-dom lock errors.
#[derive(Debug, thiserror::Error)]
pub enum MainDomError {
    #[error("Main-dom lock unavailable: {0}")]
    Unavailable(String),
}

/// The machine-wide resource instances compete for.
#[async_trait]
pub trait MainDomLock: Send + Sync {
    /// Take the lock for `instance_id`.
    ///
    /// Signals the current holder and waits up to `timeout` for it to let go,
    /// then takes over regardless. Returns `false` when a newer instance
    /// superseded this request while waiting.
    async fn acquire(&self, instance_id: Uuid, timeout: Duration) -> Result<bool, MainDomError>;

    /// Resolves once another instance asks for the lock, or the lock was
    /// taken away from `instance_id`.
    async fn listen(&self, instance_id: Uuid) -> Result<(), MainDomError>;

    /// Give the lock up if `instance_id` still holds it.
    async fn release(&self, instance_id: Uuid) -> Result<(), MainDomError>;
}

struct Registration {
    name: String,
    weight: i32,
    callback: ReleaseCallback,
}

struct Inner {
    state: MainDomState,
    claim: Option<LeadershipClaim>,
    callbacks: Vec<Registration>,
}

/// Leader elector for this process instance.
pub struct MainDom {
    instance_id: Uuid,
    lock: Arc<dyn MainDomLock>,
    claim_timeout: Duration,
    is_main_dom: AtomicBool,
    inner: Mutex<Inner>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl MainDom {
    pub fn new(lock: Arc<dyn MainDomLock>, claim_timeout: Duration) -> Self {
        Self::with_instance_id(Uuid::new_v4(), lock, claim_timeout)
    }

    pub fn with_instance_id(
        instance_id: Uuid,
        lock: Arc<dyn MainDomLock>,
        claim_timeout: Duration,
    ) -> Self {
        Self {
            instance_id,
            lock,
            claim_timeout,
            is_main_dom: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                state: MainDomState::Unclaimed,
                claim: None,
                callbacks: Vec::new(),
            }),
            listener: Mutex::new(None),
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn is_main_dom(&self) -> bool {
        self.is_main_dom.load(Ordering::Acquire)
    }

    pub fn state(&self) -> MainDomState {
        self.inner().state
    }

    pub fn claim(&self) -> Option<LeadershipClaim> {
        self.inner().claim.clone()
    }

    /// Claim main-dom. Failure is reported, never fatal: the instance simply
    /// stays non-main for its lifetime.
    pub async fn acquire(self: &Arc<Self>) -> bool {
        {
            let mut inner = self.inner();
            if inner.state != MainDomState::Unclaimed {
                return self.is_main_dom();
            }
            inner.state = MainDomState::Claiming;
        }

        info!(instance_id = %self.instance_id, "Acquiring main-dom");

        match self.lock.acquire(self.instance_id, self.claim_timeout).await {
            Ok(true) => {
                let claim = LeadershipClaim::new(self.instance_id, Utc::now());
                {
                    let mut inner = self.inner();
                    inner.state = MainDomState::Owned;
                    inner.claim = Some(claim);
                }
                self.is_main_dom.store(true, Ordering::Release);
                self.spawn_listener();
                info!(instance_id = %self.instance_id, "Acquired main-dom");
                true
            }
            Ok(false) => {
                self.inner().state = MainDomState::Unclaimed;
                warn!(
                    instance_id = %self.instance_id,
                    "Main-dom was claimed by a newer instance, this instance will not run background work"
                );
                false
            }
            Err(e) => {
                self.inner().state = MainDomState::Unclaimed;
                error!(
                    instance_id = %self.instance_id,
                    error = %e,
                    "Could not acquire main-dom, this instance will not run background work"
                );
                false
            }
        }
    }

    /// Register a callback run when main-dom is released.
    ///
    /// Lower weights run first. Returns `false` when main-dom has already been
    /// released, in which case the callback is dropped and the caller must not
    /// start work that depends on it.
    pub fn register_release_callback<F>(&self, name: impl Into<String>, weight: i32, callback: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.inner();
        if inner.state == MainDomState::Released {
            return false;
        }

        inner.callbacks.push(Registration {
            name: name.into(),
            weight,
            callback: Box::new(callback),
        });
        true
    }

    /// Release main-dom on graceful shutdown so a successor does not have to
    /// wait out the claim timeout.
    pub async fn release(&self) {
        if let Some(listener) = self.listener_slot().take() {
            listener.abort();
        }

        if !self.run_release_callbacks("shutdown") {
            return;
        }

        if let Err(e) = self.lock.release(self.instance_id).await {
            warn!(instance_id = %self.instance_id, error = %e, "Failed to release main-dom lock");
        }
    }

    fn spawn_listener(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let lock = Arc::clone(&self.lock);
        let instance_id = self.instance_id;

        let handle = tokio::spawn(async move {
            let signalled = lock.listen(instance_id).await;
            let Some(main_dom) = weak.upgrade() else {
                return;
            };

            match signalled {
                Ok(()) => info!(instance_id = %instance_id, "Another instance requested main-dom"),
                Err(e) => warn!(instance_id = %instance_id, error = %e, "Lost main-dom lock"),
            }

            if main_dom.run_release_callbacks("signalled") {
                if let Err(e) = lock.release(instance_id).await {
                    warn!(instance_id = %instance_id, error = %e, "Failed to release main-dom lock");
                }
            }
        });

        *self.listener_slot() = Some(handle);
    }

    /// Transition `Owned -> Released` and run callbacks. Returns whether this
    /// call performed the transition.
    fn run_release_callbacks(&self, reason: &str) -> bool {
        let mut callbacks = {
            let mut inner = self.inner();
            if inner.state != MainDomState::Owned {
                return false;
            }
            inner.state = MainDomState::Released;
            std::mem::take(&mut inner.callbacks)
        };
        self.is_main_dom.store(false, Ordering::Release);

        info!(
            instance_id = %self.instance_id,
            reason = reason,
            callbacks = callbacks.len(),
            "Releasing main-dom"
        );

        callbacks.sort_by_key(|registration| registration.weight);
        for registration in callbacks {
            let name = registration.name;
            if catch_unwind(AssertUnwindSafe(registration.callback)).is_err() {
                error!(callback = %name, "Main-dom release callback panicked");
            }
        }

        info!(instance_id = %self.instance_id, "Released main-dom");
        true
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn listener_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.listener.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for MainDom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainDom")
            .field("instance_id", &self.instance_id)
            .field("state", &self.state())
            .field("is_main_dom", &self.is_main_dom())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct LocalClaim {
    holder: Option<Uuid>,
    requested_by: Option<Uuid>,
}

/// Main-dom lock shared by instances living in one process.
///
/// Used for single-process deployments and tests; clone it to hand the same
/// registry to several [`MainDom`] instances.
#[derive(Clone)]
pub struct LocalMainDomLock {
    state: Arc<watch::Sender<LocalClaim>>,
}

impl LocalMainDomLock {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LocalClaim::default());
        Self {
            state: Arc::new(state),
        }
    }

    /// Current holder, if any.
    pub fn holder(&self) -> Option<Uuid> {
        self.state.borrow().holder
    }
}

impl Default for LocalMainDomLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MainDomLock for LocalMainDomLock {
    async fn acquire(&self, instance_id: Uuid, timeout: Duration) -> Result<bool, MainDomError> {
        let mut granted = false;
        self.state.send_modify(|claim| {
            if claim.holder.is_none() || claim.holder == Some(instance_id) {
                claim.holder = Some(instance_id);
                claim.requested_by = None;
                granted = true;
            } else {
                claim.requested_by = Some(instance_id);
            }
        });
        if granted {
            return Ok(true);
        }

        let mut rx = self.state.subscribe();
        let waited = tokio::time::timeout(timeout, async {
            rx.wait_for(|claim| claim.holder.is_none() || claim.requested_by != Some(instance_id))
                .await
                .map(|_| ())
        })
        .await;

        if waited.is_err() {
            warn!(
                instance_id = %instance_id,
                timeout_ms = timeout.as_millis() as u64,
                "Main-dom holder did not release in time, taking over"
            );
        }

        let mut acquired = false;
        self.state.send_modify(|claim| {
            let free = claim.holder.is_none() && claim.requested_by.is_none();
            if claim.requested_by == Some(instance_id) || free {
                claim.holder = Some(instance_id);
                claim.requested_by = None;
                acquired = true;
            }
        });
        Ok(acquired)
    }

    async fn listen(&self, instance_id: Uuid) -> Result<(), MainDomError> {
        let mut rx = self.state.subscribe();
        rx.wait_for(|claim| {
            claim.holder != Some(instance_id)
                || claim.requested_by.is_some_and(|requester| requester != instance_id)
        })
        .await
        .map(|_| ())
        .map_err(|_| MainDomError::Unavailable("local main-dom registry closed".to_string()))
    }

    async fn release(&self, instance_id: Uuid) -> Result<(), MainDomError> {
        self.state.send_modify(|claim| {
            if claim.holder == Some(instance_id) {
                claim.holder = None;
            }
        });
        Ok(())
    }
}
