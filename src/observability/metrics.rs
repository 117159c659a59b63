use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Metrics facade for the idempotency engine.
///
/// Records through the global `metrics` recorder; without one installed every
/// call is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Self {
        Self
    }

    pub fn record_request(&self, outcome: &'static str) {
        counter!("idempotency_requests_total", "outcome" => outcome).increment(1);
    }

    pub fn record_entry_completed(&self) {
        counter!("idempotency_entries_completed_total").increment(1);
    }

    pub fn record_entry_discarded(&self) {
        counter!("idempotency_entries_discarded_total").increment(1);
    }

    pub fn record_store_operation(&self, backend: &'static str, operation: &'static str, duration_ms: f64) {
        histogram!("idempotency_store_operation_duration_ms", "backend" => backend, "operation" => operation)
            .record(duration_ms);
    }

    pub fn record_entries_purged(&self, backend: &'static str, count: u64) {
        counter!("idempotency_entries_purged_total", "backend" => backend).increment(count);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Initializes the metrics system and returns the Prometheus handle.
pub fn init_metrics() -> PrometheusHandle {
    let handle = METRICS_HANDLE.get_or_init(|| {
        let builder = PrometheusBuilder::new();
        let handle = builder
            .install_recorder()
            .expect("Failed to install Prometheus recorder");

        describe_metrics();
        handle
    });

    METRICS.get_or_init(Metrics::new);

    handle.clone()
}

/// Describes all metrics for Prometheus.
fn describe_metrics() {
    describe_counter!("idempotency_requests_total", Unit::Count, "Requests seen by the idempotency coordinator, by outcome");
    describe_counter!("idempotency_entries_completed_total", Unit::Count, "First attempts whose response was stored for replay");
    describe_counter!("idempotency_entries_discarded_total", Unit::Count, "First attempts whose response was not eligible for caching");
    describe_counter!("idempotency_entries_purged_total", Unit::Count, "Expired entries removed by the sweeper");

    describe_histogram!("idempotency_store_operation_duration_ms", Unit::Milliseconds, "Key store operation latency in milliseconds");
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
