//! PostgreSQL-backed job catalogue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use domain::models::JobDescriptor;
use domain::services::{CatalogError, JobCatalog};

use crate::repositories::JobDescriptorRepository;

/// [`JobCatalog`] stored in the `job_descriptors` table.
#[derive(Clone)]
pub struct PgJobCatalog {
    repo: JobDescriptorRepository,
}

impl PgJobCatalog {
    pub fn new(repo: JobDescriptorRepository) -> Self {
        Self { repo }
    }
}

fn storage(e: sqlx::Error) -> CatalogError {
    CatalogError::Storage(e.to_string())
}

#[async_trait]
impl JobCatalog for PgJobCatalog {
    async fn register(&self, descriptor: &JobDescriptor) -> Result<bool, CatalogError> {
        self.repo.register(descriptor).await.map_err(storage)
    }

    async fn record_last_run(&self, name: &str, at: DateTime<Utc>) -> Result<(), CatalogError> {
        match self.repo.update_last_run(name, at).await.map_err(storage)? {
            0 => Err(CatalogError::NotRegistered(name.to_string())),
            _ => Ok(()),
        }
    }

    async fn find(&self, name: &str) -> Result<Option<JobDescriptor>, CatalogError> {
        let entity = self.repo.find_by_name(name).await.map_err(storage)?;
        Ok(entity.map(Into::into))
    }

    async fn list(&self) -> Result<Vec<JobDescriptor>, CatalogError> {
        let entities = self.repo.list().await.map_err(storage)?;
        Ok(entities.into_iter().map(Into::into).collect())
    }
}
