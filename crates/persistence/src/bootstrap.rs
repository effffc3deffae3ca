//! Idempotent schema bootstrap.
//!
//! Provisions the named lock rows the lock store depends on. Each row is
//! checked for existence and inserted only when absent, so the step can run
//! on every start of every farm member.

use tracing::info;

use domain::models::LockId;

use crate::repositories::DistributedLockRepository;

/// Provision `locks`. Returns how many rows were inserted.
pub async fn provision_locks(repo: &DistributedLockRepository, locks: &[LockId]) -> Result<usize, sqlx::Error> {
    let mut inserted = 0;
    for lock in locks {
        if repo.exists(*lock).await? {
            continue;
        }

        match repo.insert(*lock).await {
            Ok(()) => {
                info!(lock = %lock, "Provisioned named lock");
                inserted += 1;
            }
            // Another node provisioned it between the check and the insert.
            Err(e) if is_unique_violation(&e) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(inserted)
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}
