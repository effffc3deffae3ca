//! In-process view of job runtime state, served by the status route.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::gate::GateDecision;

/// What a job loop is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Gate closed; re-checking periodically.
    Idle,
    /// Gate open; waiting for the next tick.
    Waiting,
    Running,
    Stopped,
}

/// Result of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    /// The body declined to run, e.g. its lock was held elsewhere.
    Skipped,
    Failed,
    Panicked,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RunOutcome::Succeeded => "succeeded",
            RunOutcome::Skipped => "skipped",
            RunOutcome::Failed => "failed",
            RunOutcome::Panicked => "panicked",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub name: &'static str,
    pub enabled: bool,
    pub period_secs: u64,
    pub first_run_time: Option<String>,
    pub state: JobState,
    pub gate: Option<GateDecision>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_finished: Option<DateTime<Utc>>,
    pub last_outcome: Option<RunOutcome>,
    pub last_error: Option<String>,
    pub runs: u64,
    pub skipped: u64,
    pub failures: u64,
}

/// Shared board the job loops write to.
#[derive(Debug, Default)]
pub struct JobStatusBoard {
    jobs: Mutex<BTreeMap<&'static str, JobStatus>>,
}

impl JobStatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, BTreeMap<&'static str, JobStatus>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn register(&self, name: &'static str, enabled: bool, period_secs: u64, first_run_time: Option<String>) {
        self.jobs().insert(
            name,
            JobStatus {
                name,
                enabled,
                period_secs,
                first_run_time,
                state: JobState::Idle,
                gate: None,
                next_run: None,
                last_finished: None,
                last_outcome: None,
                last_error: None,
                runs: 0,
                skipped: 0,
                failures: 0,
            },
        );
    }

    fn update(&self, name: &str, f: impl FnOnce(&mut JobStatus)) {
        if let Some(status) = self.jobs().get_mut(name) {
            f(status);
        }
    }

    pub(crate) fn set_idle(&self, name: &str, decision: GateDecision) {
        self.update(name, |status| {
            status.state = JobState::Idle;
            status.gate = Some(decision);
            status.next_run = None;
        });
    }

    pub(crate) fn set_waiting(&self, name: &str, next_run: DateTime<Utc>) {
        self.update(name, |status| {
            status.state = JobState::Waiting;
            status.gate = Some(GateDecision::Open);
            status.next_run = Some(next_run);
        });
    }

    pub(crate) fn set_running(&self, name: &str) {
        self.update(name, |status| {
            status.state = JobState::Running;
            status.next_run = None;
        });
    }

    pub(crate) fn set_stopped(&self, name: &str) {
        self.update(name, |status| {
            status.state = JobState::Stopped;
            status.next_run = None;
        });
    }

    pub(crate) fn record_run(&self, name: &str, outcome: RunOutcome, finished: DateTime<Utc>, error: Option<String>) {
        self.update(name, |status| {
            match outcome {
                RunOutcome::Succeeded => status.runs += 1,
                RunOutcome::Skipped => status.skipped += 1,
                RunOutcome::Failed | RunOutcome::Panicked => {
                    status.runs += 1;
                    status.failures += 1;
                }
            }
            status.last_outcome = Some(outcome);
            status.last_finished = Some(finished);
            status.last_error = error;
        });
    }

    pub fn get(&self, name: &str) -> Option<JobStatus> {
        self.jobs().get(name).cloned()
    }

    /// All jobs ordered by name.
    pub fn snapshot(&self) -> Vec<JobStatus> {
        self.jobs().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_bookkeeping() {
        let board = JobStatusBoard::new();
        board.register("keep_alive", true, 300, None);

        board.set_running("keep_alive");
        board.record_run("keep_alive", RunOutcome::Failed, Utc::now(), Some("timeout".into()));
        board.record_run("keep_alive", RunOutcome::Succeeded, Utc::now(), None);

        let status = board.get("keep_alive").unwrap();
        assert_eq!(status.runs, 2);
        assert_eq!(status.failures, 1);
        assert_eq!(status.last_outcome, Some(RunOutcome::Succeeded));
        assert!(status.last_error.is_none());
    }

    #[test]
    fn test_skipped_tick_is_neither_run_nor_failure() {
        let board = JobStatusBoard::new();
        board.register("server_prune", true, 300, None);

        board.record_run("server_prune", RunOutcome::Skipped, Utc::now(), Some("lock held".into()));

        let status = board.get("server_prune").unwrap();
        assert_eq!(status.runs, 0);
        assert_eq!(status.skipped, 1);
        assert_eq!(status.failures, 0);
        assert_eq!(status.last_outcome, Some(RunOutcome::Skipped));
    }

    #[test]
    fn test_unknown_job_is_ignored() {
        let board = JobStatusBoard::new();
        board.set_idle("missing", GateDecision::Disabled);
        assert!(board.snapshot().is_empty());
    }

    #[test]
    fn test_snapshot_serializes_gate_reason() {
        let board = JobStatusBoard::new();
        board.register("server_prune", true, 300, Some("03:00".into()));
        board.set_idle("server_prune", GateDecision::RoleNotPermitted);

        let json = serde_json::to_value(board.snapshot()).unwrap();
        assert_eq!(json[0]["state"], "idle");
        assert_eq!(json[0]["gate"], "role_not_permitted");
        assert_eq!(json[0]["first_run_time"], "03:00");
    }
}
