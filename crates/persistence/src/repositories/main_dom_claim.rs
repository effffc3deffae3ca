//! Main-dom claim repository for database operations.
//!
//! Writes run on a scope connection that already holds the `MainDom` named
//! lock; reads used for polling go straight to the pool.

use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::entities::MainDomClaimEntity;
use crate::metrics::QueryTimer;

/// Repository for main-dom claim rows.
#[derive(Clone)]
pub struct MainDomClaimRepository {
    pool: PgPool,
}

impl MainDomClaimRepository {
    /// Creates a new MainDomClaimRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Read the claim row for `app_id`, creating an empty one if absent.
    pub async fn ensure(&self, conn: &mut PgConnection, app_id: &str) -> Result<MainDomClaimEntity, sqlx::Error> {
        let timer = QueryTimer::new("ensure_main_dom_claim");
        let result = sqlx::query_as::<_, MainDomClaimEntity>(
            r#"
            INSERT INTO main_dom_claims (app_id)
            VALUES ($1)
            ON CONFLICT (app_id) DO UPDATE SET app_id = main_dom_claims.app_id
            RETURNING app_id, holder_id, requested_by, acquired_at, updated_at
            "#,
        )
        .bind(app_id)
        .fetch_one(&mut *conn)
        .await;
        timer.record();
        result
    }

    /// Make `holder` the owner and clear any pending request.
    pub async fn set_holder(&self, conn: &mut PgConnection, app_id: &str, holder: Uuid) -> Result<(), sqlx::Error> {
        let timer = QueryTimer::new("set_main_dom_holder");
        let result = sqlx::query(
            r#"
            UPDATE main_dom_claims
            SET holder_id = $2, requested_by = NULL, acquired_at = NOW(), updated_at = NOW()
            WHERE app_id = $1
            "#,
        )
        .bind(app_id)
        .bind(holder)
        .execute(&mut *conn)
        .await;
        timer.record();
        result.map(|_| ())
    }

    /// Ask the current holder to let go on behalf of `requester`.
    pub async fn request(&self, conn: &mut PgConnection, app_id: &str, requester: Uuid) -> Result<(), sqlx::Error> {
        let timer = QueryTimer::new("request_main_dom");
        let result = sqlx::query(
            r#"
            UPDATE main_dom_claims
            SET requested_by = $2, updated_at = NOW()
            WHERE app_id = $1
            "#,
        )
        .bind(app_id)
        .bind(requester)
        .execute(&mut *conn)
        .await;
        timer.record();
        result.map(|_| ())
    }

    /// Clear the holder if it is still `holder`. Returns rows updated.
    pub async fn clear_holder(&self, conn: &mut PgConnection, app_id: &str, holder: Uuid) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("clear_main_dom_holder");
        let result = sqlx::query(
            r#"
            UPDATE main_dom_claims
            SET holder_id = NULL, acquired_at = NULL, updated_at = NOW()
            WHERE app_id = $1 AND holder_id = $2
            "#,
        )
        .bind(app_id)
        .bind(holder)
        .execute(&mut *conn)
        .await;
        timer.record();
        Ok(result?.rows_affected())
    }

    /// Unlocked read used while polling for handover requests.
    pub async fn find(&self, app_id: &str) -> Result<Option<MainDomClaimEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_main_dom_claim");
        let result = sqlx::query_as::<_, MainDomClaimEntity>(
            r#"
            SELECT app_id, holder_id, requested_by, acquired_at, updated_at
            FROM main_dom_claims
            WHERE app_id = $1
            "#,
        )
        .bind(app_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }
}
