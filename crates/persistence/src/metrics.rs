//! Database metrics collection.

use metrics::{counter, gauge, histogram};
use sqlx::PgPool;
use std::time::{Duration, Instant};

/// Record database query duration.
pub fn record_query_duration(query_name: &str, duration_secs: f64) {
    histogram!(
        "database_query_duration_seconds",
        "query" => query_name.to_string()
    )
    .record(duration_secs);
}

/// Record how long a named lock acquisition waited, and its outcome.
pub fn record_lock_wait(lock_name: &str, outcome: &'static str, waited: Duration) {
    histogram!(
        "named_lock_wait_seconds",
        "lock" => lock_name.to_string(),
        "outcome" => outcome
    )
    .record(waited.as_secs_f64());
    counter!(
        "named_lock_acquisitions_total",
        "lock" => lock_name.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record scope completion outcomes (`committed` / `rolled_back`).
pub fn record_scope_outcome(outcome: &'static str) {
    counter!("scope_outcomes_total", "outcome" => outcome).increment(1);
}

/// Record database connection pool metrics.
pub fn record_pool_metrics(pool: &PgPool) {
    let size = pool.size() as usize;
    let idle = pool.num_idle();
    let active = size.saturating_sub(idle);

    gauge!("database_connections_active").set(active as f64);
    gauge!("database_connections_idle").set(idle as f64);
    gauge!("database_connections_total").set(size as f64);
}

/// Times a database operation. Call [`QueryTimer::record`] once it returns.
pub struct QueryTimer {
    query_name: &'static str,
    start: Instant,
}

impl QueryTimer {
    pub fn new(query_name: &'static str) -> Self {
        Self {
            query_name,
            start: Instant::now(),
        }
    }

    pub fn record(self) {
        record_query_duration(self.query_name, self.start.elapsed().as_secs_f64());
    }
}
