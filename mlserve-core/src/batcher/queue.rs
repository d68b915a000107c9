//! Batch queue: request intake, batch formation and result fan-out.
//!
//! Submitters push envelopes into an unbounded channel; a single formation
//! task per queue reads it, closes batches on the size or time trigger, and
//! calls the handler one batch at a time.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cell::{completion_cell, Completer, Resolution};
use super::config::BatchConfig;
use super::handler::BatchHandler;
use super::metrics::{BatcherMetrics, DispatchTrigger, RequestTimer};
use crate::error::{BatchError, ConfigError};

/// A submitted request waiting to be batched
struct Envelope<In, Out> {
    payload: In,
    completer: Completer<Out>,
    timer: RequestTimer,
}

/// State shared between the queue handle and its formation task
struct Shared<In, Out> {
    config: BatchConfig,
    handler: Arc<dyn BatchHandler<In, Out>>,
    metrics: Arc<BatcherMetrics>,
    /// Requests sent into the channel and not yet taken out by the formation task
    depth: AtomicUsize,
}

/// Batches individually submitted requests in front of a [`BatchHandler`]
///
/// Share it between callers behind an `Arc`; every queue instance owns its
/// own formation task, so several differently configured queues can live in
/// one process.
///
/// ```rust,no_run
/// use std::time::Duration;
/// use mlserve_core::batcher::{handler_fn, BatchConfig, BatchQueue};
///
/// # async fn demo() -> anyhow::Result<()> {
/// let queue = BatchQueue::new(
///     BatchConfig::new(4, Duration::from_millis(50)),
///     handler_fn(|batch: Vec<String>| async move {
///         Ok(batch.into_iter().map(|s| s.to_uppercase()).collect())
///     }),
/// )?;
/// queue.start(&tokio::runtime::Handle::current())?;
///
/// let shouted = queue.submit("hello".to_string()).await?;
/// assert_eq!(shouted, "HELLO");
/// # Ok(())
/// # }
/// ```
pub struct BatchQueue<In, Out> {
    shared: Arc<Shared<In, Out>>,
    intake: mpsc::UnboundedSender<Envelope<In, Out>>,
    /// Taken by `start`; present only before the formation task runs
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Envelope<In, Out>>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    shutdown: CancellationToken,
}

impl<In, Out> BatchQueue<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Create a queue with its own metrics
    pub fn new<H>(config: BatchConfig, handler: H) -> Result<Self, ConfigError>
    where
        H: BatchHandler<In, Out>,
    {
        Self::with_metrics(config, handler, Arc::new(BatcherMetrics::new()))
    }

    /// Create a queue that records into the given metrics
    pub fn with_metrics<H>(
        config: BatchConfig,
        handler: H,
        metrics: Arc<BatcherMetrics>,
    ) -> Result<Self, ConfigError>
    where
        H: BatchHandler<In, Out>,
    {
        config.validate()?;

        let (intake, receiver) = mpsc::unbounded_channel();
        let shared = Shared { config, handler: Arc::new(handler), metrics, depth: AtomicUsize::new(0) };

        Ok(Self {
            shared: Arc::new(shared),
            intake,
            receiver: Mutex::new(Some(receiver)),
            task: Mutex::new(None),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        })
    }

    /// Spawn the formation task on the given runtime
    ///
    /// Must be called exactly once before `submit` accepts requests.
    pub fn start(&self, runtime: &Handle) -> Result<(), BatchError> {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(BatchError::AlreadyStarted)?;

        let formation = FormationLoop {
            shared: Arc::clone(&self.shared),
            receiver,
            shutdown: self.shutdown.clone(),
            draining: false,
        };
        let task = runtime.spawn(formation.run());

        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        self.started.store(true, Ordering::Release);

        info!(
            max_batch_size = self.shared.config.max_batch_size,
            batch_wait_ms = self.shared.config.batch_wait_timeout.as_millis() as u64,
            max_queue = ?self.shared.config.max_queue_size,
            "Batch queue started"
        );

        Ok(())
    }

    /// Submit one payload and wait for its result
    ///
    /// The payload is batched with other concurrent submissions; the caller
    /// only sees its own output, or the failure of the batch it landed in.
    /// Dropping the returned future before the request is batched removes
    /// the request from the queue.
    pub async fn submit(&self, payload: In) -> Result<Out, BatchError> {
        let metrics = &self.shared.metrics;
        metrics.record_received();

        if !self.started.load(Ordering::Acquire) {
            metrics.record_rejected();
            return Err(BatchError::NotStarted);
        }
        if self.shutdown.is_cancelled() {
            metrics.record_rejected();
            return Err(BatchError::Shutdown);
        }

        self.reserve_slot()?;
        metrics.record_queued();

        let (completer, pending) = completion_cell();
        let envelope = Envelope { payload, completer, timer: RequestTimer::new() };

        if self.intake.send(envelope).is_err() {
            // Formation task already closed the intake
            self.shared.depth.fetch_sub(1, Ordering::AcqRel);
            metrics.requests_queued.fetch_sub(1, Ordering::Relaxed);
            metrics.record_rejected();
            return Err(BatchError::Shutdown);
        }

        match self.shared.config.submit_timeout {
            Some(limit) => match tokio::time::timeout(limit, pending).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    metrics.record_timeout();
                    warn!(timeout_ms = limit.as_millis() as u64, "Request timed out waiting for its batch");
                    Err(BatchError::Timeout { elapsed: limit })
                }
            },
            None => pending.await,
        }
    }

    /// Stop intake, flush every queued request through the handler, and wait
    /// for the formation task to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Formation task ended abnormally");
            }
        }
    }

    /// Whether the formation task is running
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Requests submitted and not yet taken into a batch
    pub fn queue_depth(&self) -> usize {
        self.shared.depth.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &BatchConfig {
        &self.shared.config
    }

    pub fn metrics(&self) -> &Arc<BatcherMetrics> {
        &self.shared.metrics
    }

    fn reserve_slot(&self) -> Result<(), BatchError> {
        let depth = &self.shared.depth;

        let Some(max) = self.shared.config.max_queue_size else {
            depth.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        };

        depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| (d < max).then_some(d + 1))
            .map(|_| ())
            .map_err(|_| {
                self.shared.metrics.record_rejected();
                debug!(max, "Rejecting request, queue is full");
                BatchError::QueueFull { max }
            })
    }
}

impl<In, Out> Drop for BatchQueue<In, Out> {
    fn drop(&mut self) {
        // Let a running formation task flush and exit instead of idling forever
        self.shutdown.cancel();
    }
}

/// The single task that forms batches and invokes the handler
struct FormationLoop<In, Out> {
    shared: Arc<Shared<In, Out>>,
    receiver: mpsc::UnboundedReceiver<Envelope<In, Out>>,
    shutdown: CancellationToken,
    draining: bool,
}

impl<In, Out> FormationLoop<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    async fn run(mut self) {
        debug!("Formation loop running");

        while let Some(first) = self.next_request().await {
            let started = Instant::now();
            let mut batch = Vec::with_capacity(self.shared.config.max_batch_size);

            self.admit(first, &mut batch);
            self.drain_ready(&mut batch);
            if batch.is_empty() {
                continue;
            }

            let trigger = self.fill(&mut batch, started).await;
            self.dispatch(batch, trigger).await;
        }

        info!("Formation loop stopped");
    }

    /// Block until a request arrives, or return `None` once the intake is
    /// closed and empty
    async fn next_request(&mut self) -> Option<Envelope<In, Out>> {
        if self.draining {
            return self.receiver.recv().await;
        }

        tokio::select! {
            biased;
            envelope = self.receiver.recv() => envelope,
            _ = self.shutdown.cancelled() => {
                self.begin_drain();
                self.receiver.recv().await
            }
        }
    }

    /// Keep the batch open until it is full or its wait budget runs out
    async fn fill(&mut self, batch: &mut Vec<Envelope<In, Out>>, started: Instant) -> DispatchTrigger {
        let wait = self.shared.config.batch_wait_timeout;

        loop {
            if batch.len() >= self.shared.config.max_batch_size {
                return DispatchTrigger::Size;
            }
            if self.draining {
                return DispatchTrigger::Shutdown;
            }

            let elapsed = started.elapsed();
            if elapsed >= wait {
                return DispatchTrigger::Timeout;
            }
            let remaining = wait - elapsed;

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    self.begin_drain();
                    self.drain_ready(batch);
                }
                received = tokio::time::timeout(remaining, self.receiver.recv()) => match received {
                    Ok(Some(envelope)) => {
                        self.admit(envelope, batch);
                        self.drain_ready(batch);
                    }
                    // Every sender is gone; nothing more can arrive
                    Ok(None) => return DispatchTrigger::Shutdown,
                    Err(_) => {}
                },
            }
        }
    }

    /// Move every already-queued request into the batch, up to the size cap
    fn drain_ready(&mut self, batch: &mut Vec<Envelope<In, Out>>) {
        while batch.len() < self.shared.config.max_batch_size {
            match self.receiver.try_recv() {
                Ok(envelope) => self.admit(envelope, batch),
                Err(_) => break,
            }
        }
    }

    /// Take a request out of the intake, skipping it if its caller left
    fn admit(&self, envelope: Envelope<In, Out>, batch: &mut Vec<Envelope<In, Out>>) {
        self.shared.depth.fetch_sub(1, Ordering::AcqRel);

        if envelope.completer.is_abandoned() {
            self.shared.metrics.record_cancelled();
            debug!("Dropping request abandoned by its caller");
            return;
        }

        self.shared.metrics.record_dequeued(envelope.timer.queue_wait_time());
        batch.push(envelope);
    }

    fn begin_drain(&mut self) {
        self.draining = true;
        self.receiver.close();
        info!(queued = self.shared.depth.load(Ordering::Acquire), "Batch queue draining");
    }

    async fn dispatch(&self, batch: Vec<Envelope<In, Out>>, trigger: DispatchTrigger) {
        let size = batch.len();
        self.shared.metrics.record_batch(size, trigger);
        debug!(batch_size = size, trigger = trigger.as_str(), "Dispatching batch");

        let (payloads, completers): (Vec<In>, Vec<Completer<Out>>) =
            batch.into_iter().map(|e| (e.payload, e.completer)).unzip();

        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.shared.handler.handle(payloads))
            .catch_unwind()
            .await;
        let elapsed = started.elapsed();

        let results = match outcome {
            Ok(Ok(outputs)) if outputs.len() == size => Ok(outputs),
            Ok(Ok(outputs)) => {
                warn!(expected = size, actual = outputs.len(), "Handler returned wrong number of results");
                Err(BatchError::ShapeMismatch { expected: size, actual: outputs.len() })
            }
            Ok(Err(e)) => {
                warn!(batch_size = size, error = %e, "Batch handler failed");
                Err(BatchError::handler(e))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(batch_size = size, panic = %message, "Batch handler panicked");
                Err(BatchError::handler(anyhow::anyhow!("batch handler panicked: {message}")))
            }
        };

        self.shared.metrics.record_handled(size, elapsed, results.is_ok());
        debug!(batch_size = size, handler_ms = elapsed.as_millis() as u64, "Batch complete");

        let abandoned = resolve_batch(completers, results);
        if abandoned > 0 {
            debug!(abandoned, "Callers stopped waiting before their batch completed");
        }
    }
}

/// Resolve every cell of a batch, position by position
///
/// Returns how many callers had already stopped waiting.
fn resolve_batch<Out>(completers: Vec<Completer<Out>>, results: Result<Vec<Out>, BatchError>) -> usize {
    let resolutions: Vec<Resolution> = match results {
        Ok(outputs) => completers
            .into_iter()
            .zip(outputs)
            .filter(|(completer, _)| !completer.is_resolved())
            .map(|(mut completer, output)| completer.resolve(Ok(output)))
            .collect(),
        Err(err) => completers
            .into_iter()
            .filter(|completer| !completer.is_resolved())
            .map(|mut completer| completer.resolve(Err(err.clone())))
            .collect(),
    };

    resolutions.iter().filter(|r| **r == Resolution::Abandoned).count()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::handler_fn;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    type Seen = Arc<Mutex<Vec<Vec<String>>>>;

    /// Handler that records each batch and waits for a permit before answering
    fn gated_echo(seen: Seen, gate: Arc<Semaphore>) -> impl BatchHandler<String, String> {
        handler_fn(move |batch: Vec<String>| {
            let seen = seen.clone();
            let gate = gate.clone();
            async move {
                seen.lock().unwrap().push(batch.clone());
                gate.acquire().await.unwrap().forget();
                Ok(batch)
            }
        })
    }

    fn echo_queue(config: BatchConfig) -> (Arc<BatchQueue<String, String>>, Seen, Arc<Semaphore>) {
        let seen: Seen = Arc::default();
        let gate = Arc::new(Semaphore::new(0));
        let queue = BatchQueue::new(config, gated_echo(seen.clone(), gate.clone())).unwrap();
        (Arc::new(queue), seen, gate)
    }

    async fn wait_for_depth(queue: &BatchQueue<String, String>, depth: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while queue.queue_depth() != depth {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("queue never reached expected depth");
    }

    async fn wait_for_batches(seen: &Seen, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while seen.lock().unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("handler never saw expected batches");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let handler = handler_fn(|batch: Vec<u8>| async move { Ok(batch) });
        let result = BatchQueue::new(BatchConfig::new(0, Duration::ZERO), handler);
        assert!(matches!(result, Err(ConfigError::ZeroBatchSize)));
    }

    #[tokio::test]
    async fn test_submit_before_start() {
        let (queue, _, _) = echo_queue(BatchConfig::new(2, Duration::ZERO));

        let result = queue.submit("early".to_string()).await;
        assert!(matches!(result, Err(BatchError::NotStarted)));
        assert_eq!(queue.metrics().snapshot().requests_rejected, 1);
    }

    #[tokio::test]
    async fn test_start_twice() {
        let (queue, _, _) = echo_queue(BatchConfig::new(2, Duration::ZERO));

        queue.start(&Handle::current()).unwrap();
        assert!(queue.is_running());
        assert!(matches!(queue.start(&Handle::current()), Err(BatchError::AlreadyStarted)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_queue_full() {
        let config = BatchConfig::new(1, Duration::ZERO).with_max_queue_size(2);
        let (queue, seen, gate) = echo_queue(config);
        queue.start(&Handle::current()).unwrap();

        // First request occupies the handler
        let first = tokio::spawn({
            let queue = queue.clone();
            async move { queue.submit("r1".to_string()).await }
        });
        wait_for_batches(&seen, 1).await;

        let mut queued = Vec::new();
        for name in ["r2", "r3"] {
            let queue = queue.clone();
            queued.push(tokio::spawn(async move { queue.submit(name.to_string()).await }));
        }
        wait_for_depth(&queue, 2).await;

        let rejected = queue.submit("r4".to_string()).await;
        assert!(matches!(rejected, Err(BatchError::QueueFull { max: 2 })));

        gate.add_permits(3);
        assert_eq!(first.await.unwrap().unwrap(), "r1");
        for task in queued {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(queue.metrics().snapshot().requests_rejected, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submit_timeout_abandons_queued_request() {
        let config = BatchConfig::new(1, Duration::ZERO).with_submit_timeout(Duration::from_millis(30));
        let (queue, seen, gate) = echo_queue(config);
        queue.start(&Handle::current()).unwrap();

        // r1 reaches the handler and stays there past its caller's timeout
        let first = tokio::spawn({
            let queue = queue.clone();
            async move { queue.submit("r1".to_string()).await }
        });
        wait_for_batches(&seen, 1).await;

        let timed_out = queue.submit("r2".to_string()).await;
        assert!(matches!(timed_out, Err(BatchError::Timeout { .. })));
        assert!(matches!(first.await.unwrap(), Err(BatchError::Timeout { .. })));

        gate.add_permits(10);
        assert_eq!(queue.submit("r3".to_string()).await.unwrap(), "r3");

        // r2 was dropped before batching, so the handler never saw it
        let batches = seen.lock().unwrap().clone();
        assert_eq!(batches, vec![vec!["r1".to_string()], vec!["r3".to_string()]]);

        let snapshot = queue.metrics().snapshot();
        assert_eq!(snapshot.requests_timed_out, 2);
        assert_eq!(snapshot.requests_cancelled, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_submit_is_removed_from_queue() {
        let (queue, seen, gate) = echo_queue(BatchConfig::new(1, Duration::ZERO));
        queue.start(&Handle::current()).unwrap();

        let first = tokio::spawn({
            let queue = queue.clone();
            async move { queue.submit("keep-1".to_string()).await }
        });
        wait_for_batches(&seen, 1).await;

        let abandoned = tokio::time::timeout(Duration::from_millis(20), queue.submit("gone".to_string())).await;
        assert!(abandoned.is_err());

        gate.add_permits(10);
        assert!(first.await.unwrap().is_ok());
        assert_eq!(queue.submit("keep-2".to_string()).await.unwrap(), "keep-2");

        let flat: Vec<String> = seen.lock().unwrap().iter().flatten().cloned().collect();
        assert_eq!(flat, vec!["keep-1", "keep-2"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_handler_fails_batch_only() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = handler_fn({
            let calls = calls.clone();
            move |batch: Vec<u32>| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call == 0 {
                        panic!("kernel exploded");
                    }
                    Ok(batch.into_iter().map(|n| n + 1).collect())
                }
            }
        });
        let queue = BatchQueue::new(BatchConfig::new(1, Duration::ZERO), handler).unwrap();
        queue.start(&Handle::current()).unwrap();

        let err = queue.submit(1).await.unwrap_err();
        assert!(err.to_string().contains("kernel exploded"), "unexpected error: {err}");

        assert_eq!(queue.submit(41).await.unwrap(), 42);
        assert!(queue.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_flushes_queued_requests() {
        let (queue, seen, gate) = echo_queue(BatchConfig::new(8, Duration::from_secs(60)));
        queue.start(&Handle::current()).unwrap();
        gate.add_permits(10);

        let mut tasks = Vec::new();
        for i in 0..3 {
            let queue = queue.clone();
            tasks.push(tokio::spawn(async move { queue.submit(format!("req{i}")).await }));
        }
        tokio::time::timeout(Duration::from_secs(2), async {
            while queue.metrics().snapshot().requests_received < 3 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        wait_for_depth(&queue, 0).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Nothing dispatched yet: the batch waits for size or a 60s timeout
        assert!(seen.lock().unwrap().is_empty());

        queue.shutdown().await;
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert!(!queue.is_running());
        assert_eq!(queue.metrics().snapshot().batches_by_shutdown, 1);

        let after = queue.submit("late".to_string()).await;
        assert!(matches!(after, Err(BatchError::Shutdown)));
    }

    #[tokio::test]
    async fn test_resolve_batch_positions() {
        let (c1, p1) = completion_cell::<u32>();
        let (c2, p2) = completion_cell::<u32>();

        assert_eq!(resolve_batch(vec![c1, c2], Ok(vec![10, 20])), 0);
        assert_eq!(p1.await.unwrap(), 10);
        assert_eq!(p2.await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_resolve_batch_skips_resolved_cells() {
        let (mut c1, p1) = completion_cell::<u32>();
        let (c2, p2) = completion_cell::<u32>();
        c1.resolve(Err(BatchError::Shutdown));

        resolve_batch(vec![c1, c2], Ok(vec![1, 2]));
        assert!(matches!(p1.await, Err(BatchError::Shutdown)));
        assert_eq!(p2.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_resolve_batch_fans_out_failure() {
        let (c1, p1) = completion_cell::<u32>();
        let (c2, p2) = completion_cell::<u32>();
        let (c3, p3) = completion_cell::<u32>();
        drop(p3);

        let abandoned = resolve_batch(vec![c1, c2, c3], Err(BatchError::handler(anyhow::anyhow!("boom"))));
        assert_eq!(abandoned, 1);

        let (e1, e2) = (p1.await.unwrap_err(), p2.await.unwrap_err());
        match (e1, e2) {
            (BatchError::Handler(a), BatchError::Handler(b)) => assert!(Arc::ptr_eq(&a, &b)),
            other => panic!("expected handler failures, got {other:?}"),
        }
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(payload.as_ref()), "static str");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
