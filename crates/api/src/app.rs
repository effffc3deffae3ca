use axum::{middleware, routing::get, Router};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use domain::models::{RuntimeState, ServerRole};
use domain::services::{JobCatalog, MainDom};

use crate::config::Config;
use crate::jobs::JobStatusBoard;
use crate::middleware::{metrics_handler, metrics_middleware, trace_id};
use crate::routes::{health, scheduler};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub role: ServerRole,
    pub main_dom: Arc<MainDom>,
    pub runtime: Arc<RuntimeState>,
    pub catalog: Arc<dyn JobCatalog>,
    pub status: Arc<JobStatusBoard>,
}

pub fn create_app(state: AppState) -> Router {
    let request_timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    let status_routes = Router::new()
        .route("/api/v1/scheduler", get(scheduler::scheduler_status))
        .route("/api/v1/scheduler/jobs/:name", get(scheduler::job_status));

    Router::new()
        .merge(public_routes)
        .merge(status_routes)
        // Global middleware (bottom layers run first)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors)
        .with_state(state)
}
