//! Prometheus metrics for the MLServe server
//!
//! Exposes metrics in Prometheus format for monitoring and observability.

use lazy_static::lazy_static;
use mlserve_core::MetricsSnapshot;
use prometheus::{
    CounterVec, Gauge, GaugeVec, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

lazy_static! {
    /// Global Prometheus registry for MLServe metrics
    pub static ref REGISTRY: Registry = Registry::new();

    // ============== Request Metrics ==============

    /// Total requests counter with status label
    pub static ref REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("requests_total", "Total number of inference requests")
            .namespace("mlserve"),
        &["status"]
    ).expect("metric can be created");

    /// End-to-end request duration, queue wait included
    pub static ref REQUEST_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "request_duration_seconds",
            "Request duration in seconds, including time spent waiting for a batch"
        )
        .namespace("mlserve")
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0])
    ).expect("metric can be created");

    /// Requests currently waiting on the batch queue
    pub static ref ACTIVE_REQUESTS: Gauge = Gauge::with_opts(
        Opts::new("active_requests", "Number of requests waiting for a result")
            .namespace("mlserve")
    ).expect("metric can be created");

    // ============== Batch Metrics ==============

    /// Size of each batch handed to the model
    pub static ref BATCH_SIZE: Histogram = Histogram::with_opts(
        HistogramOpts::new("batch_size", "Number of requests per batch")
            .namespace("mlserve")
            .buckets(vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0])
    ).expect("metric can be created");

    /// Time spent inside the batch handler
    pub static ref HANDLER_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("handler_duration_seconds", "Batch handler duration in seconds")
            .namespace("mlserve")
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0])
    ).expect("metric can be created");

    // ============== Queue Metrics ==============

    /// Current queue depth gauge
    pub static ref QUEUE_DEPTH: Gauge = Gauge::with_opts(
        Opts::new("queue_depth", "Requests queued and not yet batched")
            .namespace("mlserve")
    ).expect("metric can be created");

    /// Batches dispatched, by what closed them
    pub static ref BATCHES_DISPATCHED: GaugeVec = GaugeVec::new(
        Opts::new("batches_dispatched", "Batches dispatched since start, by trigger")
            .namespace("mlserve"),
        &["trigger"]
    ).expect("metric can be created");

    /// Average batch size since start
    pub static ref AVG_BATCH_SIZE: Gauge = Gauge::with_opts(
        Opts::new("avg_batch_size", "Average number of requests per batch")
            .namespace("mlserve")
    ).expect("metric can be created");
}

/// Register all metrics with the global registry.
/// Should be called once at startup.
pub fn register_metrics() -> prometheus::Result<()> {
    // Request metrics
    REGISTRY.register(Box::new(REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEST_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(ACTIVE_REQUESTS.clone()))?;

    // Batch metrics
    REGISTRY.register(Box::new(BATCH_SIZE.clone()))?;
    REGISTRY.register(Box::new(HANDLER_DURATION_SECONDS.clone()))?;

    // Queue metrics
    REGISTRY.register(Box::new(QUEUE_DEPTH.clone()))?;
    REGISTRY.register(Box::new(BATCHES_DISPATCHED.clone()))?;
    REGISTRY.register(Box::new(AVG_BATCH_SIZE.clone()))?;

    Ok(())
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# Error encoding metrics: {}", e))
}

/// Copy the batch queue's own counters into the exported gauges.
pub fn sync_batcher(snapshot: &MetricsSnapshot, queue_depth: usize) {
    QUEUE_DEPTH.set(queue_depth as f64);
    AVG_BATCH_SIZE.set(snapshot.avg_batch_size);
    BATCHES_DISPATCHED
        .with_label_values(&["size"])
        .set(snapshot.batches_by_size as f64);
    BATCHES_DISPATCHED
        .with_label_values(&["timeout"])
        .set(snapshot.batches_by_timeout as f64);
    BATCHES_DISPATCHED
        .with_label_values(&["shutdown"])
        .set(snapshot.batches_by_shutdown as f64);
}

/// Record the size of a batch entering the handler.
pub fn record_batch_size(size: usize) {
    BATCH_SIZE.observe(size as f64);
}

/// Record how long the handler took for one batch.
pub fn record_handler_duration(secs: f64) {
    HANDLER_DURATION_SECONDS.observe(secs);
}

/// Helper struct for tracking request duration.
/// Counts as cancelled if dropped without an explicit record.
pub struct RequestTimer {
    start: std::time::Instant,
}

impl RequestTimer {
    /// Start a new request timer.
    pub fn new() -> Self {
        ACTIVE_REQUESTS.inc();
        Self { start: std::time::Instant::now() }
    }

    /// Record a successful request completion.
    pub fn record_success(self) {
        self.finish("success");
    }

    /// Record a failed request under the given status label.
    pub fn record_failure(self, status: &str) {
        self.finish(status);
    }

    fn finish(self, status: &str) {
        REQUEST_DURATION_SECONDS.observe(self.start.elapsed().as_secs_f64());
        REQUESTS_TOTAL.with_label_values(&[status]).inc();
        ACTIVE_REQUESTS.dec();
        // Prevent the Drop impl from running
        std::mem::forget(self);
    }
}

impl Default for RequestTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        // Client went away before a result came back
        ACTIVE_REQUESTS.dec();
        REQUESTS_TOTAL.with_label_values(&["cancelled"]).inc();
    }
}
