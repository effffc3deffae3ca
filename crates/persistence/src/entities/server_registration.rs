//! Server registration entity (database row mapping).

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// Database row mapping for the server_registrations table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ServerRegistrationEntity {
    pub id: i64,
    pub identity: String,
    pub address: String,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}
