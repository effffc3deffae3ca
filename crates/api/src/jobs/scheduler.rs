//! Recurring job runner.
//!
//! Each registered job owns one long-lived task. The task idles while the
//! job's gate is closed, re-checking on a coarse interval. Once the gate
//! opens it waits the initial delay, then invokes the job body once per
//! period. Invocations of one job never overlap, and a failing or panicking
//! invocation is logged and does not stop the loop.
//!
//! Shutdown is observed at every wait and before every invocation. Losing
//! main-dom cancels the job's leadership token: the in-flight invocation is
//! allowed to finish and the next tick is skipped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use domain::models::{JobDescriptor, RoleRequirement};
use domain::services::{get_delay, JobCatalog};
use persistence::{LockError, ScopeError};

use super::gate::{GateDecision, JobGate};
use super::status::{JobStatusBoard, RunOutcome};

/// Error returned by a job body.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("{0}")]
    Failed(String),

    /// The body chose not to run this tick. Not a failure, and not a run.
    #[error("Skipped: {0}")]
    Skipped(String),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Scope(#[from] ScopeError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handed to every invocation of a job body.
#[derive(Debug, Clone)]
pub struct JobContext {
    cancellation: CancellationToken,
    invocation: u64,
}

impl JobContext {
    pub fn new(cancellation: CancellationToken, invocation: u64) -> Self {
        Self {
            cancellation,
            invocation,
        }
    }

    /// Cancelled on shutdown or when main-dom is released.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// 1-based invocation number since the job last became active.
    pub fn invocation(&self) -> u64 {
        self.invocation
    }
}

/// A recurring background job.
#[async_trait]
pub trait Job: Send + Sync {
    /// Unique job name, used for the catalogue and logging.
    fn name(&self) -> &'static str;

    /// Period used when configuration does not set one.
    fn default_period(&self) -> Duration;

    fn role_requirement(&self) -> RoleRequirement {
        RoleRequirement::SchedulingRole
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError>;
}

/// Per-job schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSettings {
    pub enabled: bool,
    pub period: Duration,
    /// Clock time (`HH:mm`) or cron expression for the first run.
    pub first_run_time: Option<String>,
}

impl JobSettings {
    pub fn new(enabled: bool, period: Duration, first_run_time: Option<String>) -> Self {
        Self {
            enabled,
            period,
            first_run_time,
        }
    }
}

/// Scheduler-wide timings.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    /// Initial delay when no first-run time applies, and the "too close" threshold.
    pub default_delay: Duration,
    /// How often an idle job re-checks its gate.
    pub idle_recheck: Duration,
}

struct ScheduledJob {
    job: Arc<dyn Job>,
    settings: JobSettings,
}

#[derive(Clone)]
struct RunnerContext {
    gate: JobGate,
    catalog: Arc<dyn JobCatalog>,
    status: Arc<JobStatusBoard>,
    settings: SchedulerSettings,
    shutdown: CancellationToken,
}

/// Background job scheduler.
pub struct JobScheduler {
    jobs: Vec<ScheduledJob>,
    context: RunnerContext,
    tasks: JoinSet<()>,
}

impl JobScheduler {
    pub fn new(gate: JobGate, catalog: Arc<dyn JobCatalog>, settings: SchedulerSettings) -> Self {
        Self {
            jobs: Vec::new(),
            context: RunnerContext {
                gate,
                catalog,
                status: Arc::new(JobStatusBoard::new()),
                settings,
                shutdown: CancellationToken::new(),
            },
            tasks: JoinSet::new(),
        }
    }

    /// Register a job. A second job with the same name is ignored, and a
    /// zero period falls back to the job's default period.
    pub fn register<J: Job + 'static>(&mut self, job: J, mut settings: JobSettings) {
        if self.jobs.iter().any(|entry| entry.job.name() == job.name()) {
            warn!(job = job.name(), "Job already registered, ignoring duplicate");
            return;
        }
        if settings.period.is_zero() {
            settings.period = job.default_period();
        }
        self.jobs.push(ScheduledJob {
            job: Arc::new(job),
            settings,
        });
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|entry| entry.job.name()).collect()
    }

    /// Runtime status of every job, shared with the status route.
    pub fn status(&self) -> Arc<JobStatusBoard> {
        Arc::clone(&self.context.status)
    }

    /// Record every job in the catalogue and start one task per job.
    pub async fn start(&mut self) {
        info!(
            jobs = self.jobs.len(),
            role = %self.context.gate.role(),
            "Starting job scheduler"
        );

        for entry in &self.jobs {
            let name = entry.job.name();
            let settings = &entry.settings;

            let descriptor = JobDescriptor::new(name, settings.period, settings.first_run_time.clone());
            match self.context.catalog.register(&descriptor).await {
                Ok(true) => info!(job = name, "Job registered in catalogue"),
                Ok(false) => debug!(job = name, "Job already in catalogue"),
                Err(e) => warn!(job = name, error = %e, "Could not register job in catalogue"),
            }

            self.context.status.register(
                name,
                settings.enabled,
                settings.period.as_secs(),
                settings.first_run_time.clone(),
            );

            self.tasks.spawn(run_job(
                Arc::clone(&entry.job),
                settings.clone(),
                self.context.clone(),
            ));
        }
    }

    /// Signal every job loop to stop. Returns immediately.
    pub fn shutdown(&self) {
        info!("Initiating job scheduler shutdown");
        self.context.shutdown.cancel();
    }

    /// Wait for job loops to finish, aborting whatever is left after `grace`.
    ///
    /// Aborting a loop also aborts its in-flight invocation, so nothing of a
    /// job outlives this call.
    pub async fn wait_for_shutdown(self, grace: Duration) {
        info!(grace_secs = grace.as_secs(), "Waiting for jobs to complete");

        let mut tasks = self.tasks;
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "Job task ended abnormally");
                }
            }
        })
        .await;

        match drained {
            Ok(()) => info!("All jobs completed gracefully"),
            Err(_) => {
                warn!(
                    grace_secs = grace.as_secs(),
                    remaining = tasks.len(),
                    "Job shutdown timed out, aborting remaining jobs"
                );
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
            }
        }
    }
}

/// Sleep unless `token` is cancelled first. Returns whether the full sleep elapsed.
async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

fn after(delay: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
}

async fn run_job(job: Arc<dyn Job>, settings: JobSettings, cx: RunnerContext) {
    let name = job.name();
    let requirement = job.role_requirement();

    let leadership = cx.shutdown.child_token();
    let on_release = leadership.clone();
    let registered = cx
        .gate
        .main_dom()
        .register_release_callback(format!("job:{name}"), 0, move || on_release.cancel());
    if !registered {
        leadership.cancel();
    }

    let mut idle_reason: Option<GateDecision> = None;

    'run: loop {
        let decision = cx.gate.evaluate(settings.enabled, requirement);
        if !decision.is_open() {
            if idle_reason != Some(decision) {
                info!(job = name, reason = %decision, "Job idle");
                idle_reason = Some(decision);
            } else {
                debug!(job = name, reason = %decision, "Job still idle");
            }
            cx.status.set_idle(name, decision);

            if !sleep_or_cancel(&cx.shutdown, cx.settings.idle_recheck).await {
                break 'run;
            }
            continue 'run;
        }
        idle_reason = None;

        let delay = get_delay(settings.first_run_time.as_deref(), Utc::now(), cx.settings.default_delay);
        info!(
            job = name,
            delay_secs = delay.as_secs(),
            period_secs = settings.period.as_secs(),
            "Job scheduled"
        );
        cx.status.set_waiting(name, after(delay));
        if !sleep_or_cancel(&leadership, delay).await {
            if cx.shutdown.is_cancelled() {
                break 'run;
            }
            info!(job = name, "Main-dom released before first run");
            continue 'run;
        }

        let mut invocation = 0;
        loop {
            if leadership.is_cancelled() {
                break;
            }

            let decision = cx.gate.evaluate(settings.enabled, requirement);
            if !decision.is_open() {
                info!(job = name, reason = %decision, "Gate closed, job going idle");
                continue 'run;
            }

            invocation += 1;
            invoke(&job, &cx, JobContext::new(leadership.clone(), invocation)).await;

            cx.status.set_waiting(name, after(settings.period));
            if !sleep_or_cancel(&leadership, settings.period).await {
                break;
            }
        }

        if cx.shutdown.is_cancelled() {
            break 'run;
        }
        info!(job = name, "Main-dom released, next tick aborted");
    }

    cx.status.set_stopped(name);
    info!(job = name, "Job stopped");
}

/// Run one invocation on its own task so a panic is contained. The task
/// lives in a set owned by this future: aborting the job loop aborts it too.
async fn invoke(job: &Arc<dyn Job>, cx: &RunnerContext, ctx: JobContext) {
    let name = job.name();
    let invocation = ctx.invocation();
    cx.status.set_running(name);
    debug!(job = name, invocation, "Job starting");

    let started = Instant::now();
    let body = Arc::clone(job);
    let mut invocation_task = JoinSet::new();
    invocation_task.spawn(async move { body.execute(&ctx).await });
    let Some(joined) = invocation_task.join_next().await else {
        return;
    };
    let elapsed = started.elapsed();
    let elapsed_ms = elapsed.as_millis() as u64;
    let finished = Utc::now();

    let (outcome, message) = match joined {
        Ok(Ok(())) => {
            info!(job = name, invocation, elapsed_ms, "Job completed successfully");
            if let Err(e) = cx.catalog.record_last_run(name, finished).await {
                warn!(job = name, error = %e, "Could not record last run");
            }
            (RunOutcome::Succeeded, None)
        }
        Ok(Err(JobError::Skipped(reason))) => {
            info!(job = name, invocation, elapsed_ms, reason = %reason, "Job skipped this tick");
            (RunOutcome::Skipped, Some(reason))
        }
        Ok(Err(e)) => {
            error!(job = name, invocation, elapsed_ms, error = %e, "Job failed");
            (RunOutcome::Failed, Some(e.to_string()))
        }
        Err(e) => {
            error!(job = name, invocation, elapsed_ms, error = %e, "Job panicked");
            (RunOutcome::Panicked, Some(e.to_string()))
        }
    };

    counter!("scheduler_job_runs_total", "job" => name, "outcome" => outcome.as_str()).increment(1);
    histogram!("scheduler_job_duration_seconds", "job" => name).record(elapsed.as_secs_f64());
    cx.status.record_run(name, outcome, finished, message);
}
