//! Temporary file cleanup job.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use domain::models::RoleRequirement;

use super::scheduler::{Job, JobContext, JobError};

/// Totals for one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub files_removed: u64,
    pub bytes_removed: u64,
    pub errors: u64,
}

/// Deletes files older than `max_age` under the configured directories.
///
/// Every node has its own temp directories, so this runs on any known role.
pub struct TempFileCleanupJob {
    directories: Vec<PathBuf>,
    max_age: Duration,
}

impl TempFileCleanupJob {
    pub fn new(directories: Vec<PathBuf>, max_age: Duration) -> Self {
        Self { directories, max_age }
    }

    /// Sweep every directory once. Missing directories are skipped.
    pub async fn cleanup(&self, cancellation: &CancellationToken) -> CleanupSummary {
        let mut summary = CleanupSummary::default();
        let cutoff = SystemTime::now().checked_sub(self.max_age);

        for directory in &self.directories {
            if cancellation.is_cancelled() {
                break;
            }
            sweep(directory, cutoff, cancellation, &mut summary).await;
        }

        summary
    }
}

async fn sweep(root: &Path, cutoff: Option<SystemTime>, cancellation: &CancellationToken, summary: &mut CleanupSummary) {
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %dir.display(), "Temp directory does not exist, skipping");
                continue;
            }
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Could not read temp directory");
                summary.errors += 1;
                continue;
            }
        };

        loop {
            if cancellation.is_cancelled() {
                return;
            }

            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "Could not list temp directory");
                    summary.errors += 1;
                    break;
                }
            };

            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not stat temp file");
                    summary.errors += 1;
                    continue;
                }
            };

            if metadata.is_dir() {
                pending.push(path);
                continue;
            }
            if !metadata.is_file() {
                continue;
            }

            let expired = match (metadata.modified(), cutoff) {
                (Ok(modified), Some(cutoff)) => modified <= cutoff,
                _ => false,
            };
            if !expired {
                continue;
            }

            match fs::remove_file(&path).await {
                Ok(()) => {
                    summary.files_removed += 1;
                    summary.bytes_removed += metadata.len();
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not remove temp file");
                    summary.errors += 1;
                }
            }
        }
    }
}

#[async_trait]
impl Job for TempFileCleanupJob {
    fn name(&self) -> &'static str {
        "temp_file_cleanup"
    }

    fn default_period(&self) -> Duration {
        Duration::from_secs(3600)
    }

    fn role_requirement(&self) -> RoleRequirement {
        RoleRequirement::AnyKnownRole
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let summary = self.cleanup(ctx.cancellation()).await;

        if summary.files_removed > 0 {
            info!(
                files_removed = summary.files_removed,
                bytes_removed = summary.bytes_removed,
                errors = summary.errors,
                "Temp file cleanup completed"
            );
        } else {
            debug!(errors = summary.errors, "Temp file cleanup found nothing to remove");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write(path: &Path, contents: &str) {
        fs::write(path, contents).await.unwrap();
    }

    #[tokio::test]
    async fn test_removes_expired_files_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("media").join("cache");
        fs::create_dir_all(&nested).await.unwrap();
        write(&dir.path().join("upload.tmp"), "abc").await;
        write(&nested.join("thumb.tmp"), "12345").await;

        let job = TempFileCleanupJob::new(vec![dir.path().to_path_buf()], Duration::ZERO);
        let summary = job.cleanup(&CancellationToken::new()).await;

        assert_eq!(summary.files_removed, 2);
        assert_eq!(summary.bytes_removed, 8);
        assert_eq!(summary.errors, 0);
        assert!(!dir.path().join("upload.tmp").exists());
        assert!(nested.exists());
    }

    #[tokio::test]
    async fn test_keeps_fresh_files() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("fresh.tmp"), "data").await;

        let job = TempFileCleanupJob::new(vec![dir.path().to_path_buf()], Duration::from_secs(86_400));
        let summary = job.cleanup(&CancellationToken::new()).await;

        assert_eq!(summary, CleanupSummary::default());
        assert!(dir.path().join("fresh.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let job = TempFileCleanupJob::new(vec![dir.path().join("does-not-exist")], Duration::ZERO);

        let ctx = JobContext::new(CancellationToken::new(), 1);
        tokio_test::assert_ok!(job.execute(&ctx).await);
    }

    #[tokio::test]
    async fn test_cancelled_sweep_removes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("old.tmp"), "x").await;

        let token = CancellationToken::new();
        token.cancel();
        let job = TempFileCleanupJob::new(vec![dir.path().to_path_buf()], Duration::ZERO);

        assert_eq!(job.cleanup(&token).await.files_removed, 0);
        assert!(dir.path().join("old.tmp").exists());
    }

    #[test]
    fn test_runs_on_any_known_role() {
        let job = TempFileCleanupJob::new(Vec::new(), Duration::ZERO);
        assert_eq!(job.role_requirement(), RoleRequirement::AnyKnownRole);
    }
}
