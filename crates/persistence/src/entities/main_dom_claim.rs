//! Main-dom claim entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row mapping for the main_dom_claims table.
///
/// One row per application identity. `requested_by` is set by an instance
/// waiting for the current holder to let go.
#[derive(Debug, Clone, FromRow)]
pub struct MainDomClaimEntity {
    pub app_id: String,
    pub holder_id: Option<Uuid>,
    pub requested_by: Option<Uuid>,
    pub acquired_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
