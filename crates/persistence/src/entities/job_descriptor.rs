//! Job descriptor entity (database row mapping).

use chrono::{DateTime, Utc};
use shared::ticks::ticks_to_duration;
use sqlx::FromRow;

use domain::models::JobDescriptor;

/// Database row mapping for the job_descriptors table.
#[derive(Debug, Clone, FromRow)]
pub struct JobDescriptorEntity {
    pub id: i64,
    pub name: String,
    pub period_ticks: i64,
    pub first_run_time: Option<String>,
    pub last_run_utc: Option<DateTime<Utc>>,
}

impl From<JobDescriptorEntity> for JobDescriptor {
    fn from(entity: JobDescriptorEntity) -> Self {
        Self {
            name: entity.name,
            period: ticks_to_duration(entity.period_ticks),
            first_run_time: entity.first_run_time,
            last_run: entity.last_run_utc,
        }
    }
}
