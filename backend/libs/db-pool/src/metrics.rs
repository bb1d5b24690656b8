//! Pool gauges and acquisition instrumentation

use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};
use sqlx::{pool::PoolConnection, PgPool, Postgres};
use std::time::{Duration, Instant};
use tracing::warn;

/// Acquisitions slower than this are logged; the visit pipeline holds row
/// locks while it waits.
const SLOW_ACQUIRE: Duration = Duration::from_millis(500);

lazy_static::lazy_static! {
    static ref POOL_CONNECTIONS: IntGaugeVec = register_int_gauge_vec!(
        "db_pool_connections",
        "Connections in the pool by state (idle, in_use, max)",
        &["service", "state"]
    ).expect("db_pool_connections registration");

    static ref ACQUIRE_SECONDS: HistogramVec = register_histogram_vec!(
        "db_pool_acquire_duration_seconds",
        "Wait for a pooled connection",
        &["service"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).expect("db_pool_acquire_duration_seconds registration");

    static ref ACQUIRE_FAILURES: IntCounterVec = register_int_counter_vec!(
        "db_pool_acquire_failures_total",
        "Failed acquisitions by cause",
        &["service", "cause"]
    ).expect("db_pool_acquire_failures_total registration");
}

fn failure_cause(err: &sqlx::Error) -> &'static str {
    match err {
        sqlx::Error::PoolTimedOut => "timeout",
        sqlx::Error::PoolClosed => "closed",
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) => "network",
        _ => "other",
    }
}

pub(crate) fn update_pool_metrics(pool: &PgPool, service: &str) {
    let size = i64::from(pool.size());
    let idle = pool.num_idle() as i64;

    for (state, value) in [
        ("idle", idle),
        ("in_use", size - idle),
        ("max", i64::from(pool.options().get_max_connections())),
    ] {
        POOL_CONNECTIONS.with_label_values(&[service, state]).set(value);
    }
}

/// `pool.acquire()` with wait-time and failure accounting.
///
/// Transaction-heavy callers use this instead of `pool.begin()` so that
/// lock-holding waits show up on the pool dashboards.
pub async fn acquire_with_metrics(
    pool: &PgPool,
    service: &str,
) -> Result<PoolConnection<Postgres>, sqlx::Error> {
    let start = Instant::now();
    let result = pool.acquire().await;
    let waited = start.elapsed();

    ACQUIRE_SECONDS
        .with_label_values(&[service])
        .observe(waited.as_secs_f64());
    if waited >= SLOW_ACQUIRE {
        warn!(service, waited_ms = waited.as_millis() as u64, "Slow database connection acquire");
    }

    match &result {
        Ok(_) => update_pool_metrics(pool, service),
        Err(e) => ACQUIRE_FAILURES
            .with_label_values(&[service, failure_cause(e)])
            .inc(),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_failures_are_classified() {
        assert_eq!(failure_cause(&sqlx::Error::PoolTimedOut), "timeout");
        assert_eq!(failure_cause(&sqlx::Error::PoolClosed), "closed");
        assert_eq!(failure_cause(&sqlx::Error::RowNotFound), "other");
    }
}
