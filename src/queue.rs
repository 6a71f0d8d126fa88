//! Batched, asynchronous delivery of captured events
//!
//! [`DeliveryQueue::enqueue`] is a non-blocking `try_send` into a bounded
//! channel. A worker task owns the current [`DeliveryBatch`] and ships it to the
//! collector when it reaches the configured size or when the flush timer fires.
//! Events arriving while a batch is in flight wait in the channel and form the
//! next batch.
//!
//! Failed transmissions are retried with exponential backoff. Once the retry
//! budget is spent the batch is dropped and counted; nothing is persisted.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, MissedTickBehavior};

use crate::config::DeliveryConfig;
use crate::error::{DeliveryError, MonitorError};
use crate::event::CapturedEvent;
use crate::transport::{HttpClient, HttpRequest};

/// Ordered events awaiting transmission
#[derive(Debug, Clone, Default)]
pub struct DeliveryBatch {
    events: Vec<CapturedEvent>,
}

impl DeliveryBatch {
    pub fn push(&mut self, event: CapturedEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[CapturedEvent] {
        &self.events
    }

    /// JSON array of the events, in insertion order
    pub fn encode(&self) -> Result<Vec<u8>, DeliveryError> {
        Ok(serde_json::to_vec(&self.events)?)
    }
}

/// Where the worker is in its flush cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Idle,
    Flushing,
    Backoff,
    Closed,
}

impl DeliveryState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => DeliveryState::Flushing,
            2 => DeliveryState::Backoff,
            3 => DeliveryState::Closed,
            _ => DeliveryState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            DeliveryState::Idle => 0,
            DeliveryState::Flushing => 1,
            DeliveryState::Backoff => 2,
            DeliveryState::Closed => 3,
        }
    }
}

/// What happened to the batch taken by a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending
    Empty,
    Delivered { events: usize, attempts: u32 },
    /// Retry budget spent, batch discarded
    Dropped { events: usize, attempts: u32 },
    /// The worker has stopped
    Closed,
}

/// Counter snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    /// Accepted by `enqueue`
    pub enqueued: u64,
    /// Refused by `enqueue` (buffer full or queue closed)
    pub abandoned: u64,
    pub delivered_events: u64,
    pub delivered_batches: u64,
    /// Batches dropped after exhausting retries
    pub failed_batches: u64,
    pub dropped_events: u64,
    pub retries: u64,
}

#[derive(Debug, Default)]
struct Shared {
    state: AtomicU8,
    enqueued: AtomicU64,
    abandoned: AtomicU64,
    delivered_events: AtomicU64,
    delivered_batches: AtomicU64,
    failed_batches: AtomicU64,
    dropped_events: AtomicU64,
    retries: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: DeliveryState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn snapshot(&self) -> DeliveryStats {
        DeliveryStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            delivered_events: self.delivered_events.load(Ordering::Relaxed),
            delivered_batches: self.delivered_batches.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

enum Command {
    Event(CapturedEvent),
    Flush(oneshot::Sender<FlushOutcome>),
    Close(oneshot::Sender<FlushOutcome>),
}

/// Handle to the delivery worker. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    sender: mpsc::Sender<Command>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Event(_) => f.write_str("Event"),
            Command::Flush(_) => f.write_str("Flush"),
            Command::Close(_) => f.write_str("Close"),
        }
    }
}

impl DeliveryQueue {
    /// Spawn the worker on the current tokio runtime
    pub fn spawn<C: HttpClient>(
        collector: impl Into<String>,
        config: DeliveryConfig,
        client: C,
    ) -> Result<Self, MonitorError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| MonitorError::NoRuntime)?;

        let (sender, receiver) = mpsc::channel(config.buffer_capacity.max(1));
        let shared = Arc::new(Shared::default());

        let worker = Worker {
            client,
            collector: collector.into(),
            config,
            shared: Arc::clone(&shared),
            batch: DeliveryBatch::default(),
        };
        log::debug!(
            "Starting delivery worker for {} (batch {}, every {}ms)",
            worker.collector,
            worker.config.batch_threshold,
            worker.config.flush_interval_ms
        );
        runtime.spawn(worker.run(receiver));

        Ok(Self { sender, shared })
    }

    /// Hand an event to the worker without waiting. Returns false if it was abandoned.
    pub fn enqueue(&self, event: CapturedEvent) -> bool {
        match self.sender.try_send(Command::Event(event)) {
            Ok(()) => {
                self.shared.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shared.abandoned.fetch_add(1, Ordering::Relaxed);
                log::debug!("Delivery buffer full, abandoning one event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.shared.abandoned.fetch_add(1, Ordering::Relaxed);
                log::debug!("Delivery queue closed, abandoning one event");
                false
            }
        }
    }

    /// Ship everything enqueued so far and wait for the result
    pub async fn flush(&self) -> FlushOutcome {
        self.request(Command::Flush).await
    }

    /// Stop accepting events, flush what is pending and stop the worker
    pub async fn close(&self) -> FlushOutcome {
        self.request(Command::Close).await
    }

    pub fn stats(&self) -> DeliveryStats {
        self.shared.snapshot()
    }

    pub fn state(&self) -> DeliveryState {
        DeliveryState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    async fn request(&self, command: fn(oneshot::Sender<FlushOutcome>) -> Command) -> FlushOutcome {
        let (reply, outcome) = oneshot::channel();
        if self.sender.send(command(reply)).await.is_err() {
            return FlushOutcome::Closed;
        }
        outcome.await.unwrap_or(FlushOutcome::Closed)
    }
}

struct Worker<C> {
    client: C,
    collector: String,
    config: DeliveryConfig,
    shared: Arc<Shared>,
    batch: DeliveryBatch,
}

impl<C: HttpClient> Worker<C> {
    async fn run(mut self, mut receiver: mpsc::Receiver<Command>) {
        let period = self.config.flush_interval().max(Duration::from_millis(1));
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                command = receiver.recv() => match command {
                    Some(Command::Event(event)) => {
                        self.batch.push(event);
                        if self.batch.len() >= self.config.batch_threshold {
                            self.flush().await;
                        }
                    }
                    Some(Command::Flush(reply)) => {
                        let outcome = self.flush().await;
                        let _ = reply.send(outcome);
                    }
                    Some(Command::Close(reply)) => {
                        self.shutdown(&mut receiver, vec![reply]).await;
                        return;
                    }
                    None => {
                        self.shutdown(&mut receiver, Vec::new()).await;
                        return;
                    }
                },
                _ = ticker.tick() => {
                    if !self.batch.is_empty() {
                        self.flush().await;
                    }
                }
            }
        }
    }

    /// Drain whatever is still buffered into one final batch
    async fn shutdown(&mut self, receiver: &mut mpsc::Receiver<Command>, mut replies: Vec<oneshot::Sender<FlushOutcome>>) {
        receiver.close();
        while let Ok(command) = receiver.try_recv() {
            match command {
                Command::Event(event) => self.batch.push(event),
                Command::Flush(reply) | Command::Close(reply) => replies.push(reply),
            }
        }

        let outcome = self.flush().await;
        self.shared.set_state(DeliveryState::Closed);
        log::debug!("Delivery worker for {} stopped: {:?}", self.collector, outcome);
        for reply in replies {
            let _ = reply.send(outcome);
        }
    }

    async fn flush(&mut self) -> FlushOutcome {
        if self.batch.is_empty() {
            return FlushOutcome::Empty;
        }

        let batch = std::mem::take(&mut self.batch);
        let events = batch.len();

        // Encoded once: every attempt resends the same ordered body
        let body = match batch.encode() {
            Ok(body) => body,
            Err(e) => {
                log::error!("Dropping batch of {} events: {}", events, e);
                self.record_drop(events);
                return FlushOutcome::Dropped { events, attempts: 0 };
            }
        };

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            self.shared.set_state(DeliveryState::Flushing);

            match self.transmit(&body).await {
                Ok(()) => {
                    self.shared.delivered_events.fetch_add(events as u64, Ordering::Relaxed);
                    self.shared.delivered_batches.fetch_add(1, Ordering::Relaxed);
                    self.shared.set_state(DeliveryState::Idle);
                    log::debug!("Delivered {} events to {} in {} attempt(s)", events, self.collector, attempts);
                    return FlushOutcome::Delivered { events, attempts };
                }
                Err(e) => {
                    let retry = attempts - 1;
                    if retry >= self.config.max_retries {
                        log::error!(
                            "Dropping batch of {} events after {} attempt(s): {}",
                            events,
                            attempts,
                            e
                        );
                        self.record_drop(events);
                        return FlushOutcome::Dropped { events, attempts };
                    }

                    let delay = self.config.backoff(retry);
                    log::warn!(
                        "Delivery attempt {} to {} failed: {} (retrying in {}ms)",
                        attempts,
                        self.collector,
                        e,
                        delay.as_millis()
                    );
                    self.shared.retries.fetch_add(1, Ordering::Relaxed);
                    self.shared.set_state(DeliveryState::Backoff);
                    time::sleep(delay).await;
                }
            }
        }
    }

    async fn transmit(&self, body: &[u8]) -> Result<(), DeliveryError> {
        let request = HttpRequest::post(&self.collector).json(body.to_vec());
        let response = self.client.execute(request).await?;

        if response.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(response.status))
        }
    }

    fn record_drop(&self, events: usize) {
        self.shared.failed_batches.fetch_add(1, Ordering::Relaxed);
        self.shared.dropped_events.fetch_add(events as u64, Ordering::Relaxed);
        self.shared.set_state(DeliveryState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::error::HttpError;
    use crate::event::{ErrorCategory, EventNormalizer, RawError};
    use crate::transport::HttpResponse;
    use serde_json::Value;
    use std::future::Future;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;
    use tokio::sync::Semaphore;

    /// Records every body and answers with a fixed status
    #[derive(Clone, Default)]
    struct RecordingClient {
        bodies: Arc<Mutex<Vec<Vec<u8>>>>,
        status: u16,
    }

    impl RecordingClient {
        fn with_status(status: u16) -> Self {
            Self {
                bodies: Arc::default(),
                status,
            }
        }

        fn batches(&self) -> Vec<Vec<Value>> {
            self.bodies
                .lock()
                .unwrap()
                .iter()
                .map(|b| serde_json::from_slice(b).unwrap())
                .collect()
        }
    }

    impl HttpClient for RecordingClient {
        fn execute(&self, request: HttpRequest) -> impl Future<Output = Result<HttpResponse, HttpError>> + Send {
            self.bodies.lock().unwrap().push(request.body.unwrap_or_default());
            let status = self.status;
            async move { Ok(HttpResponse { status, body: Vec::new() }) }
        }
    }

    /// Fails the first `failures` calls, then succeeds
    #[derive(Clone, Default)]
    struct FlakyClient {
        calls: Arc<AtomicU32>,
        bodies: Arc<Mutex<Vec<Vec<u8>>>>,
        failures: u32,
    }

    impl HttpClient for FlakyClient {
        fn execute(&self, request: HttpRequest) -> impl Future<Output = Result<HttpResponse, HttpError>> + Send {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.bodies.lock().unwrap().push(request.body.unwrap_or_default());
            let fail = call < self.failures;
            async move {
                if fail {
                    Err(HttpError::Transport("connection refused".to_string()))
                } else {
                    Ok(HttpResponse { status: 200, body: Vec::new() })
                }
            }
        }
    }

    /// Holds every call until a permit is released
    #[derive(Clone)]
    struct GatedClient {
        gate: Arc<Semaphore>,
        inner: RecordingClient,
    }

    impl HttpClient for GatedClient {
        fn execute(&self, request: HttpRequest) -> impl Future<Output = Result<HttpResponse, HttpError>> + Send {
            let gate = Arc::clone(&self.gate);
            let response = self.inner.execute(request);
            async move {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
                response.await
            }
        }
    }

    fn delivery(batch_threshold: usize, max_retries: u32) -> DeliveryConfig {
        DeliveryConfig {
            flush_interval_ms: 60_000,
            batch_threshold,
            max_retries,
            backoff_base_ms: 1,
            backoff_max_ms: 5,
            buffer_capacity: 64,
            request_timeout_ms: 1_000,
        }
    }

    fn event(msg: &str) -> CapturedEvent {
        let normalizer = EventNormalizer::new(&MonitorConfig::new("test-ui", "index.html", "v1.0.0"));
        normalizer.normalize_error(&RawError::Text(msg.to_string()), ErrorCategory::Lifecycle)
    }

    fn messages(batch: &[Value]) -> Vec<String> {
        batch
            .iter()
            .map(|e| e["payload"]["message"].as_str().unwrap().to_string())
            .collect()
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_explicit_flush_preserves_order() {
        let client = RecordingClient::with_status(200);
        let queue = DeliveryQueue::spawn("http://collector/events", delivery(100, 0), client.clone()).unwrap();

        for msg in ["first", "second", "third"] {
            assert!(queue.enqueue(event(msg)));
        }
        let outcome = queue.flush().await;

        assert_eq!(outcome, FlushOutcome::Delivered { events: 3, attempts: 1 });
        let batches = client.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(messages(&batches[0]), vec!["first", "second", "third"]);
        assert_eq!(queue.stats().delivered_events, 3);
        assert_eq!(queue.state(), DeliveryState::Idle);
    }

    #[tokio::test]
    async fn test_flush_with_nothing_pending() {
        let queue = DeliveryQueue::spawn("http://collector/events", delivery(10, 0), RecordingClient::with_status(200)).unwrap();
        assert_eq!(queue.flush().await, FlushOutcome::Empty);
    }

    #[tokio::test]
    async fn test_threshold_triggers_flush() {
        let client = RecordingClient::with_status(200);
        let queue = DeliveryQueue::spawn("http://collector/events", delivery(2, 0), client.clone()).unwrap();

        queue.enqueue(event("a"));
        queue.enqueue(event("b"));

        wait_for(|| client.batches().len() == 1).await;
        assert_eq!(messages(&client.batches()[0]), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_timer_triggers_flush() {
        let client = RecordingClient::with_status(200);
        let config = DeliveryConfig {
            flush_interval_ms: 20,
            ..delivery(100, 0)
        };
        let queue = DeliveryQueue::spawn("http://collector/events", config, client.clone()).unwrap();

        queue.enqueue(event("lonely"));

        wait_for(|| client.batches().len() == 1).await;
        assert_eq!(queue.stats().delivered_batches, 1);
    }

    #[tokio::test]
    async fn test_failing_backend_drops_after_max_retries() {
        let client = FlakyClient {
            failures: u32::MAX,
            ..FlakyClient::default()
        };
        let queue = DeliveryQueue::spawn("http://collector/events", delivery(100, 2), client.clone()).unwrap();

        for msg in ["a", "b", "c"] {
            queue.enqueue(event(msg));
        }
        let outcome = queue.flush().await;

        assert_eq!(outcome, FlushOutcome::Dropped { events: 3, attempts: 3 });
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);

        let stats = queue.stats();
        assert_eq!(stats.failed_batches, 1);
        assert_eq!(stats.dropped_events, 3);
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.delivered_events, 0);
        assert_eq!(queue.state(), DeliveryState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_backs_off_between_attempts() {
        let client = FlakyClient {
            failures: u32::MAX,
            ..FlakyClient::default()
        };
        let config = DeliveryConfig {
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
            ..delivery(100, 2)
        };
        let queue = DeliveryQueue::spawn("http://collector/events", config, client.clone()).unwrap();
        queue.enqueue(event("slow"));

        let started = time::Instant::now();
        let flush = tokio::spawn({
            let queue = queue.clone();
            async move { queue.flush().await }
        });

        // Time stays frozen while this task keeps yielding
        for _ in 0..1_000 {
            if queue.state() == DeliveryState::Backoff {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(queue.state(), DeliveryState::Backoff);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        let outcome = flush.await.unwrap();
        assert_eq!(outcome, FlushOutcome::Dropped { events: 1, attempts: 3 });
        // 100ms before the first retry, 200ms before the second
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(queue.state(), DeliveryState::Idle);
    }

    #[tokio::test]
    async fn test_rejecting_status_is_retried() {
        let client = RecordingClient::with_status(503);
        let queue = DeliveryQueue::spawn("http://collector/events", delivery(100, 1), client.clone()).unwrap();

        queue.enqueue(event("x"));
        let outcome = queue.flush().await;

        assert_eq!(outcome, FlushOutcome::Dropped { events: 1, attempts: 2 });
        assert_eq!(client.batches().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_resends_same_ordered_body() {
        let client = FlakyClient {
            failures: 2,
            ..FlakyClient::default()
        };
        let queue = DeliveryQueue::spawn("http://collector/events", delivery(100, 3), client.clone()).unwrap();

        queue.enqueue(event("one"));
        queue.enqueue(event("two"));
        let outcome = queue.flush().await;

        assert_eq!(outcome, FlushOutcome::Delivered { events: 2, attempts: 3 });
        let bodies = client.bodies.lock().unwrap().clone();
        assert_eq!(bodies.len(), 3);
        assert!(bodies.iter().all(|b| *b == bodies[0]));
        assert_eq!(queue.stats().failed_batches, 0);
    }

    #[tokio::test]
    async fn test_events_during_flight_form_next_batch() {
        let gate = Arc::new(Semaphore::new(0));
        let inner = RecordingClient::with_status(200);
        let client = GatedClient {
            gate: Arc::clone(&gate),
            inner: inner.clone(),
        };
        let queue = DeliveryQueue::spawn("http://collector/events", delivery(100, 0), client).unwrap();

        queue.enqueue(event("in-flight"));
        let first = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.flush().await })
        };
        wait_for(|| inner.batches().len() == 1).await;
        assert_eq!(queue.state(), DeliveryState::Flushing);

        queue.enqueue(event("next-1"));
        queue.enqueue(event("next-2"));
        gate.add_permits(2);

        assert_eq!(first.await.unwrap(), FlushOutcome::Delivered { events: 1, attempts: 1 });
        assert_eq!(queue.flush().await, FlushOutcome::Delivered { events: 2, attempts: 1 });

        let batches = inner.batches();
        assert_eq!(messages(&batches[0]), vec!["in-flight"]);
        assert_eq!(messages(&batches[1]), vec!["next-1", "next-2"]);
    }

    #[tokio::test]
    async fn test_enqueue_never_waits_on_stuck_backend() {
        let gate = Arc::new(Semaphore::new(0));
        let client = GatedClient {
            gate,
            inner: RecordingClient::with_status(200),
        };
        let config = DeliveryConfig {
            buffer_capacity: 8,
            ..delivery(1, 0)
        };
        let queue = DeliveryQueue::spawn("http://collector/events", config, client).unwrap();

        let started = Instant::now();
        for i in 0..1_000 {
            queue.enqueue(event(&format!("e{}", i)));
        }
        assert!(started.elapsed() < Duration::from_millis(500));

        let stats = queue.stats();
        assert_eq!(stats.enqueued + stats.abandoned, 1_000);
        assert!(stats.abandoned > 0);
    }

    #[tokio::test]
    async fn test_close_flushes_and_rejects_later_events() {
        let client = RecordingClient::with_status(200);
        let queue = DeliveryQueue::spawn("http://collector/events", delivery(100, 0), client.clone()).unwrap();

        queue.enqueue(event("last words"));
        assert_eq!(queue.close().await, FlushOutcome::Delivered { events: 1, attempts: 1 });
        assert_eq!(queue.state(), DeliveryState::Closed);

        wait_for(|| !queue.enqueue(event("too late"))).await;
        assert!(queue.stats().abandoned >= 1);
        assert_eq!(queue.flush().await, FlushOutcome::Closed);
    }

    #[test]
    fn test_spawn_without_runtime() {
        let err = DeliveryQueue::spawn("http://collector/events", delivery(1, 0), RecordingClient::with_status(200))
            .unwrap_err();
        assert!(matches!(err, MonitorError::NoRuntime));
    }
}
