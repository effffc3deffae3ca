//! Recurring job runner and job implementations.

mod gate;
mod keep_alive;
mod locked;
mod pool_metrics;
mod scheduler;
mod server_prune;
mod status;
mod temp_file_cleanup;
mod touch_server;

use sqlx::PgPool;
use std::path::PathBuf;
use std::time::Duration;

use domain::models::{LockId, LockMode};
use persistence::repositories::ServerRegistrationRepository;
use persistence::{DistributedLockRepository, ScopeProvider};

use crate::config::JobsConfig;

pub use gate::{GateDecision, JobGate};
pub use keep_alive::KeepAliveJob;
pub use locked::{LockedJob, ScopedJob};
pub use pool_metrics::PoolMetricsJob;
pub use scheduler::{Job, JobContext, JobError, JobScheduler, JobSettings, SchedulerSettings};
pub use server_prune::{ServerPruneJob, SERVERS_PRUNED_TOPIC};
pub use status::{JobState, JobStatus, JobStatusBoard, RunOutcome};
pub use temp_file_cleanup::{CleanupSummary, TempFileCleanupJob};
pub use touch_server::TouchServerJob;

/// What the built-in jobs need from the rest of the application.
#[derive(Clone)]
pub struct JobDependencies {
    pub pool: PgPool,
    pub scopes: ScopeProvider,
    pub locks: DistributedLockRepository,
    pub servers: ServerRegistrationRepository,
    pub identity: String,
    pub address: String,
}

/// Register every built-in job. Disabled jobs are registered too so they
/// show up in the status report; their gate keeps them idle.
pub fn register_jobs(scheduler: &mut JobScheduler, config: &JobsConfig, deps: &JobDependencies) -> Result<(), JobError> {
    let keep_alive = KeepAliveJob::new(
        config.keep_alive.url.clone(),
        Duration::from_secs(config.keep_alive.timeout_secs),
    )?;
    scheduler.register(keep_alive, config.keep_alive.settings());

    let mut directories: Vec<PathBuf> = config
        .temp_file_cleanup
        .directories
        .iter()
        .map(PathBuf::from)
        .collect();
    if directories.is_empty() {
        directories.push(std::env::temp_dir().join("farmhand"));
    }
    scheduler.register(
        TempFileCleanupJob::new(directories, Duration::from_secs(config.temp_file_cleanup.max_age_secs)),
        config.temp_file_cleanup.settings(),
    );

    scheduler.register(
        TouchServerJob::new(deps.servers.clone(), deps.identity.clone(), deps.address.clone()),
        config.touch_server.settings(),
    );

    let prune = ServerPruneJob::new(
        deps.servers.clone(),
        Duration::from_secs(config.server_prune.stale_after_secs),
    );
    scheduler.register(
        LockedJob::new(
            prune,
            LockId::SERVERS,
            LockMode::Write,
            deps.scopes.clone(),
            deps.locks.clone(),
        ),
        config.server_prune.settings(),
    );

    scheduler.register(PoolMetricsJob::new(deps.pool.clone()), config.pool_metrics.settings());

    Ok(())
}
