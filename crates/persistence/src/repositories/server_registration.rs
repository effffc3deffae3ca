//! Server registration repository for database operations.

use sqlx::PgPool;
use std::time::Duration;

use crate::entities::ServerRegistrationEntity;
use crate::metrics::QueryTimer;
use crate::scope::{Scope, ScopeError};

/// Repository for farm member registrations.
#[derive(Clone)]
pub struct ServerRegistrationRepository {
    pool: PgPool,
}

impl ServerRegistrationRepository {
    /// Creates a new ServerRegistrationRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Register this server or refresh its heartbeat.
    pub async fn touch(&self, identity: &str, address: &str) -> Result<ServerRegistrationEntity, sqlx::Error> {
        let timer = QueryTimer::new("touch_server_registration");
        let result = sqlx::query_as::<_, ServerRegistrationEntity>(
            r#"
            INSERT INTO server_registrations (identity, address)
            VALUES ($1, $2)
            ON CONFLICT (identity) DO UPDATE SET
                address = EXCLUDED.address,
                last_seen_at = NOW()
            RETURNING id, identity, address, registered_at, last_seen_at
            "#,
        )
        .bind(identity)
        .bind(address)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Registrations seen within `window`, oldest registration first.
    pub async fn list_active(&self, window: Duration) -> Result<Vec<ServerRegistrationEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_active_servers");
        let result = sqlx::query_as::<_, ServerRegistrationEntity>(
            r#"
            SELECT id, identity, address, registered_at, last_seen_at
            FROM server_registrations
            WHERE last_seen_at > NOW() - make_interval(secs => $1)
            ORDER BY registered_at, id
            "#,
        )
        .bind(window.as_secs_f64())
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Remove this server's registration on graceful shutdown.
    pub async fn deregister(&self, identity: &str) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("deregister_server");
        let result = sqlx::query("DELETE FROM server_registrations WHERE identity = $1")
            .bind(identity)
            .execute(&self.pool)
            .await;
        timer.record();
        Ok(result?.rows_affected())
    }

    /// Delete registrations not seen for longer than `stale_after`, inside
    /// the caller's scope. Returns the number of rows deleted.
    pub async fn delete_stale(&self, scope: &Scope, stale_after: Duration) -> Result<u64, ScopeError> {
        let timer = QueryTimer::new("delete_stale_servers");
        let mut conn = scope.connection().await?;
        let result = sqlx::query(
            r#"
            DELETE FROM server_registrations
            WHERE last_seen_at < NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(stale_after.as_secs_f64())
        .execute(&mut *conn)
        .await;
        timer.record();
        Ok(result?.rows_affected())
    }
}
