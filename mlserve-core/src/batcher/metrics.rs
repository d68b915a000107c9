//! Metrics for the batch queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Why the formation loop closed a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchTrigger {
    /// The batch reached `max_batch_size`
    Size,
    /// `batch_wait_timeout` elapsed since the first request
    Timeout,
    /// The queue is shutting down and flushed what it had
    Shutdown,
}

impl DispatchTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Timeout => "timeout",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Metrics for monitoring batch queue behavior
#[derive(Debug, Default)]
pub struct BatcherMetrics {
    /// Total requests submitted (including rejected ones)
    pub requests_received: AtomicU64,

    /// Requests currently waiting to be placed in a batch
    pub requests_queued: AtomicU64,

    /// Requests rejected because the intake was full or closed
    pub requests_rejected: AtomicU64,

    /// Requests whose caller stopped waiting before they were batched
    pub requests_cancelled: AtomicU64,

    /// Requests whose caller hit the submit timeout
    pub requests_timed_out: AtomicU64,

    /// Requests resolved with a handler result
    pub requests_succeeded: AtomicU64,

    /// Requests resolved with a batch failure
    pub requests_failed: AtomicU64,

    /// Maximum queue depth observed
    pub max_queue_depth: AtomicU64,

    /// Total time requests spent queued, in milliseconds
    pub total_queue_wait_ms: AtomicU64,

    /// Batches handed to the handler
    pub batches_dispatched: AtomicU64,

    /// Batches closed by the size trigger
    pub batches_by_size: AtomicU64,

    /// Batches closed by the wait timeout
    pub batches_by_timeout: AtomicU64,

    /// Batches flushed during shutdown
    pub batches_by_shutdown: AtomicU64,

    /// Batches whose handler call failed
    pub batches_failed: AtomicU64,

    /// Total requests across all dispatched batches
    pub total_batch_requests: AtomicU64,

    /// Total handler time in milliseconds
    pub total_handler_ms: AtomicU64,
}

impl BatcherMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request submitted by a caller
    pub fn record_received(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request entering the intake buffer
    pub fn record_queued(&self) {
        let queued = self.requests_queued.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_queue_depth.fetch_max(queued, Ordering::Relaxed);
    }

    /// Record a request leaving the intake buffer for a batch
    pub fn record_dequeued(&self, wait_time: Duration) {
        self.requests_queued.fetch_sub(1, Ordering::Relaxed);
        self.total_queue_wait_ms
            .fetch_add(wait_time.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record a request refused at intake
    pub fn record_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a queued request dropped because its caller went away
    pub fn record_cancelled(&self) {
        self.requests_queued.fetch_sub(1, Ordering::Relaxed);
        self.requests_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a caller giving up after the submit timeout
    pub fn record_timeout(&self) {
        self.requests_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a batch being handed to the handler
    pub fn record_batch(&self, batch_size: usize, trigger: DispatchTrigger) {
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
        self.total_batch_requests
            .fetch_add(batch_size as u64, Ordering::Relaxed);

        let counter = match trigger {
            DispatchTrigger::Size => &self.batches_by_size,
            DispatchTrigger::Timeout => &self.batches_by_timeout,
            DispatchTrigger::Shutdown => &self.batches_by_shutdown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one handler call
    pub fn record_handled(&self, batch_size: usize, handler_time: Duration, success: bool) {
        self.total_handler_ms
            .fetch_add(handler_time.as_millis() as u64, Ordering::Relaxed);

        if success {
            self.requests_succeeded
                .fetch_add(batch_size as u64, Ordering::Relaxed);
        } else {
            self.batches_failed.fetch_add(1, Ordering::Relaxed);
            self.requests_failed
                .fetch_add(batch_size as u64, Ordering::Relaxed);
        }
    }

    /// Get current queue depth
    pub fn queue_depth(&self) -> u64 {
        self.requests_queued.load(Ordering::Relaxed)
    }

    /// Calculate average batch size
    pub fn avg_batch_size(&self) -> f64 {
        let batches = self.batches_dispatched.load(Ordering::Relaxed);
        if batches == 0 {
            return 0.0;
        }
        let total_requests = self.total_batch_requests.load(Ordering::Relaxed);
        total_requests as f64 / batches as f64
    }

    /// Calculate average time a batched request spent queued, in milliseconds
    pub fn avg_queue_wait_ms(&self) -> f64 {
        let batched = self.total_batch_requests.load(Ordering::Relaxed);
        if batched == 0 {
            return 0.0;
        }
        let total_wait = self.total_queue_wait_ms.load(Ordering::Relaxed);
        total_wait as f64 / batched as f64
    }

    /// Calculate average handler time per batch in milliseconds
    pub fn avg_handler_ms(&self) -> f64 {
        let batches = self.batches_dispatched.load(Ordering::Relaxed);
        if batches == 0 {
            return 0.0;
        }
        let total = self.total_handler_ms.load(Ordering::Relaxed);
        total as f64 / batches as f64
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_received: self.requests_received.load(Ordering::Relaxed),
            requests_queued: self.requests_queued.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            requests_cancelled: self.requests_cancelled.load(Ordering::Relaxed),
            requests_timed_out: self.requests_timed_out.load(Ordering::Relaxed),
            requests_succeeded: self.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            max_queue_depth: self.max_queue_depth.load(Ordering::Relaxed),
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            batches_by_size: self.batches_by_size.load(Ordering::Relaxed),
            batches_by_timeout: self.batches_by_timeout.load(Ordering::Relaxed),
            batches_by_shutdown: self.batches_by_shutdown.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            avg_batch_size: self.avg_batch_size(),
            avg_queue_wait_ms: self.avg_queue_wait_ms(),
            avg_handler_ms: self.avg_handler_ms(),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub requests_received: u64,
    pub requests_queued: u64,
    pub requests_rejected: u64,
    pub requests_cancelled: u64,
    pub requests_timed_out: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub max_queue_depth: u64,
    pub batches_dispatched: u64,
    pub batches_by_size: u64,
    pub batches_by_timeout: u64,
    pub batches_by_shutdown: u64,
    pub batches_failed: u64,
    pub avg_batch_size: f64,
    pub avg_queue_wait_ms: f64,
    pub avg_handler_ms: f64,
}

/// Timer for tracking how long a request sat in the intake buffer
#[derive(Debug, Clone, Copy)]
pub struct RequestTimer {
    pub queued_at: Instant,
}

impl RequestTimer {
    pub fn new() -> Self {
        Self { queued_at: Instant::now() }
    }

    pub fn queue_wait_time(&self) -> Duration {
        self.queued_at.elapsed()
    }
}

impl Default for RequestTimer {
    fn default() -> Self {
        Self::new()
    }
}
