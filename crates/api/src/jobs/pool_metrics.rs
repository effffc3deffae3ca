//! Connection pool gauges.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;

use domain::models::RoleRequirement;

use super::scheduler::{Job, JobContext, JobError};

/// Publishes the pool's active, idle and total connection counts.
pub struct PoolMetricsJob {
    pool: PgPool,
}

impl PoolMetricsJob {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Job for PoolMetricsJob {
    fn name(&self) -> &'static str {
        "pool_metrics"
    }

    fn default_period(&self) -> Duration {
        Duration::from_secs(10)
    }

    // Every node has its own pool.
    fn role_requirement(&self) -> RoleRequirement {
        RoleRequirement::AnyKnownRole
    }

    async fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
        persistence::metrics::record_pool_metrics(&self.pool);
        Ok(())
    }
}
