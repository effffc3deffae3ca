//! Named lock entity (database row mapping).

use sqlx::FromRow;

/// Database row mapping for the locks table.
///
/// The row carries no payload; it exists to be the target of a locking read.
#[derive(Debug, Clone, FromRow)]
pub struct LockEntity {
    pub id: i32,
    pub name: String,
}
