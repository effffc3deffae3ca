//! Job descriptor repository for database operations.

use chrono::{DateTime, Utc};
use shared::ticks::duration_to_ticks;
use sqlx::PgPool;

use domain::models::JobDescriptor;

use crate::entities::JobDescriptorEntity;
use crate::metrics::QueryTimer;

/// Repository for recurring job registrations.
#[derive(Clone)]
pub struct JobDescriptorRepository {
    pool: PgPool,
}

impl JobDescriptorRepository {
    /// Creates a new JobDescriptorRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Register a job unless one with the same name exists.
    ///
    /// Checks first and inserts only when absent; the insert still tolerates
    /// a concurrent registration by another node. Returns whether a row was
    /// inserted.
    pub async fn register(&self, descriptor: &JobDescriptor) -> Result<bool, sqlx::Error> {
        if self.find_by_name(&descriptor.name).await?.is_some() {
            return Ok(false);
        }

        let timer = QueryTimer::new("register_job_descriptor");
        let result = sqlx::query(
            r#"
            INSERT INTO job_descriptors (name, period_ticks, first_run_time)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(&descriptor.name)
        .bind(duration_to_ticks(descriptor.period))
        .bind(descriptor.first_run_time.as_deref())
        .execute(&self.pool)
        .await;
        timer.record();

        Ok(result?.rows_affected() == 1)
    }

    /// Record the completion time of a successful run. Returns rows updated.
    pub async fn update_last_run(&self, name: &str, at: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("update_job_last_run");
        let result = sqlx::query(
            r#"
            UPDATE job_descriptors
            SET last_run_utc = $2
            WHERE name = $1
            "#,
        )
        .bind(name)
        .bind(at)
        .execute(&self.pool)
        .await;
        timer.record();

        Ok(result?.rows_affected())
    }

    /// Find a registration by job name.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<JobDescriptorEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_job_descriptor");
        let result = sqlx::query_as::<_, JobDescriptorEntity>(
            r#"
            SELECT id, name, period_ticks, first_run_time, last_run_utc
            FROM job_descriptors
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// All registrations ordered by name.
    pub async fn list(&self) -> Result<Vec<JobDescriptorEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_job_descriptors");
        let result = sqlx::query_as::<_, JobDescriptorEntity>(
            r#"
            SELECT id, name, period_ticks, first_run_time, last_run_utc
            FROM job_descriptors
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }
}
