use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: lifecycle operations executed. Labels: op, status.
pub const OPERATIONS_TOTAL: &str = "spacebook_operations_total";

/// Histogram: lifecycle operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "spacebook_operation_duration_seconds";

// ── Event pipeline ──────────────────────────────────────────────

/// Counter: events handed to every sink. Labels: kind.
pub const EVENTS_DISPATCHED_TOTAL: &str = "spacebook_events_dispatched_total";

/// Counter: events dropped before delivery. Labels: reason.
pub const EVENTS_DROPPED_TOTAL: &str = "spacebook_events_dropped_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "spacebook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "spacebook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Run one engine operation and record its outcome and latency.
pub(crate) async fn timed<T>(
    op: &'static str,
    fut: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    let started = Instant::now();
    let result = fut.await;
    let status = match &result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::counter!(OPERATIONS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
    result
}
