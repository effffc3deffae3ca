//! Job catalogue: where recurring job registrations are persisted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::models::JobDescriptor;

/// Job catalogue errors.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Job not registered: {0}")]
    NotRegistered(String),

    #[error("Job catalogue storage error: {0}")]
    Storage(String),
}

/// Stores job descriptors across restarts.
#[async_trait]
pub trait JobCatalog: Send + Sync {
    /// Register a descriptor if no job with that name exists yet.
    ///
    /// Returns `true` when this call inserted it. An existing registration is
    /// left untouched so `last_run` survives restarts.
    async fn register(&self, descriptor: &JobDescriptor) -> Result<bool, CatalogError>;

    /// Record the completion time of a successful invocation.
    async fn record_last_run(&self, name: &str, at: DateTime<Utc>) -> Result<(), CatalogError>;

    async fn find(&self, name: &str) -> Result<Option<JobDescriptor>, CatalogError>;

    /// All registrations, ordered by name.
    async fn list(&self) -> Result<Vec<JobDescriptor>, CatalogError>;
}

/// Process-local catalogue used when no database is configured, and in tests.
#[derive(Debug, Default)]
pub struct InMemoryJobCatalog {
    jobs: Mutex<BTreeMap<String, JobDescriptor>>,
}

impl InMemoryJobCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, JobDescriptor>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl JobCatalog for InMemoryJobCatalog {
    async fn register(&self, descriptor: &JobDescriptor) -> Result<bool, CatalogError> {
        let mut jobs = self.jobs();
        if jobs.contains_key(&descriptor.name) {
            return Ok(false);
        }
        jobs.insert(descriptor.name.clone(), descriptor.clone());
        Ok(true)
    }

    async fn record_last_run(&self, name: &str, at: DateTime<Utc>) -> Result<(), CatalogError> {
        match self.jobs().get_mut(name) {
            Some(descriptor) => {
                descriptor.last_run = Some(at);
                Ok(())
            }
            None => Err(CatalogError::NotRegistered(name.to_string())),
        }
    }

    async fn find(&self, name: &str) -> Result<Option<JobDescriptor>, CatalogError> {
        Ok(self.jobs().get(name).cloned())
    }

    async fn list(&self) -> Result<Vec<JobDescriptor>, CatalogError> {
        Ok(self.jobs().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[tokio::test]
    async fn test_register_is_insert_if_absent() {
        let catalog = InMemoryJobCatalog::new();
        let descriptor = JobDescriptor::new("keep_alive", Duration::from_secs(300), None);

        assert!(catalog.register(&descriptor).await.unwrap());
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        catalog.record_last_run("keep_alive", at).await.unwrap();

        let changed = JobDescriptor::new("keep_alive", Duration::from_secs(60), None);
        assert!(!catalog.register(&changed).await.unwrap());

        let stored = catalog.find("keep_alive").await.unwrap().unwrap();
        assert_eq!(stored.period, Duration::from_secs(300));
        assert_eq!(stored.last_run, Some(at));
    }

    #[tokio::test]
    async fn test_record_last_run_for_unknown_job() {
        let catalog = InMemoryJobCatalog::new();
        let result = catalog.record_last_run("missing", Utc::now()).await;
        assert!(matches!(result, Err(CatalogError::NotRegistered(name)) if name == "missing"));
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_name() {
        let catalog = InMemoryJobCatalog::new();
        for name in ["touch_server", "keep_alive", "temp_file_cleanup"] {
            catalog
                .register(&JobDescriptor::new(name, Duration::from_secs(60), None))
                .await
                .unwrap();
        }

        let names: Vec<String> = catalog.list().await.unwrap().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["keep_alive", "temp_file_cleanup", "touch_server"]);
    }
}
