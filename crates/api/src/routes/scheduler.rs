//! Scheduler status endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use domain::models::{LeadershipClaim, MainDomState, RuntimeLevel, ServerRole};

use crate::app::AppState;
use crate::error::ApiError;
use crate::jobs::JobStatus;

#[derive(Debug, Serialize)]
pub struct MainDomStatus {
    pub instance_id: Uuid,
    pub state: MainDomState,
    pub claim: Option<LeadershipClaim>,
}

/// Runtime status of one job merged with its catalogue record.
#[derive(Debug, Serialize)]
pub struct JobStatusView {
    #[serde(flatten)]
    pub status: JobStatus,
    pub last_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct SchedulerStatusResponse {
    pub role: ServerRole,
    pub runtime_level: RuntimeLevel,
    pub main_dom: MainDomStatus,
    pub jobs: Vec<JobStatusView>,
}

/// GET /api/v1/scheduler
pub async fn scheduler_status(State(state): State<AppState>) -> Result<Json<SchedulerStatusResponse>, ApiError> {
    let last_runs: HashMap<String, Option<DateTime<Utc>>> = state
        .catalog
        .list()
        .await?
        .into_iter()
        .map(|descriptor| (descriptor.name, descriptor.last_run))
        .collect();

    let jobs = state
        .status
        .snapshot()
        .into_iter()
        .map(|status| {
            let last_run = last_runs.get(status.name).copied().flatten();
            JobStatusView { status, last_run }
        })
        .collect();

    Ok(Json(SchedulerStatusResponse {
        role: state.role,
        runtime_level: state.runtime.level(),
        main_dom: MainDomStatus {
            instance_id: state.main_dom.instance_id(),
            state: state.main_dom.state(),
            claim: state.main_dom.claim(),
        },
        jobs,
    }))
}

/// GET /api/v1/scheduler/jobs/:name
pub async fn job_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<JobStatusView>, ApiError> {
    let status = state
        .status
        .get(&name)
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", name)))?;

    let last_run = state.catalog.find(&name).await?.and_then(|descriptor| descriptor.last_run);

    Ok(Json(JobStatusView { status, last_run }))
}
