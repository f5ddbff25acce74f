//! Worker pool: bounded channel, parallel workers, retry timers, shutdown.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use futures::FutureExt as _;
use opentelemetry::KeyValue;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

use crate::error::{Error, Result};
use crate::telemetry::metrics;
use crate::telemetry::work::{record_outcome, start_work_span};

use super::item::WorkItem;
use super::processor::{DeadLetterSink, Processor};
use super::retry::RetryPolicy;
use super::stats::{Counters, Stats};

/// Capacity of the work channel unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 1024;

/// How often [`Engine::wait_idle`] re-checks the counters.
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

const RUNNING: u8 = 0;
const STOPPING: u8 = 1;
const STOPPED: u8 = 2;

/// Shutdown state of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Running,
    Stopping,
    Stopped,
}

/// Builder for an [`Engine`].
pub struct EngineBuilder {
    workers: usize,
    capacity: usize,
    retry: RetryPolicy,
    dead_letter: Option<DeadLetterSink>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            workers: 8,
            capacity: DEFAULT_CAPACITY,
            retry: RetryPolicy::default(),
            dead_letter: None,
        }
    }
}

impl EngineBuilder {
    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn dead_letter(mut self, sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.dead_letter = Some(Arc::new(sink));
        self
    }

    /// Launch the workers.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start<P: Processor>(self, processor: P) -> Engine {
        let workers = self.workers.max(1);
        let capacity = self.capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);

        let shared = Arc::new(Shared {
            retry: self.retry,
            dead_letter: self.dead_letter,
            counters: Counters::default(),
            gate: Mutex::new(Gate {
                sender: Some(sender),
                timers: HashMap::new(),
            }),
            lifecycle: AtomicU8::new(RUNNING),
            cancel: CancellationToken::new(),
            next_timer: AtomicU64::new(0),
        });

        let processor: Arc<dyn Processor> = Arc::new(processor);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let handles = (0..workers)
            .map(|index| {
                tokio::spawn(worker_loop(
                    index,
                    Arc::clone(&shared),
                    Arc::clone(&receiver),
                    Arc::clone(&processor),
                ))
            })
            .collect();

        info!(workers, capacity, "engine started");

        Engine {
            shared,
            workers: tokio::sync::Mutex::new(Some(handles)),
        }
    }
}

/// The task-execution engine.
///
/// Items are admitted with [`enqueue`](Self::enqueue), executed by a fixed
/// set of workers, retried with backoff on failure, and handed to the
/// dead-letter sink once the retry budget is spent. Execution is
/// at-least-once with no ordering guarantee across retries.
pub struct Engine {
    shared: Arc<Shared>,
    workers: tokio::sync::Mutex<Option<Vec<JoinHandle<()>>>>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Admit an item, waiting for channel space when the channel is full.
    ///
    /// Returns [`Error::Stopped`] once [`stop`](Self::stop) has begun.
    /// Cancel-safe: dropping the future before it resolves admits nothing.
    pub async fn enqueue(&self, item: WorkItem) -> Result<()> {
        let sender = self.shared.gate().sender.clone().ok_or(Error::Stopped)?;
        let permit = sender.reserve().await.map_err(|_| Error::Stopped)?;
        self.shared.counters.admitted();
        permit.send(item);
        Ok(())
    }

    /// Is [`enqueue`](Self::enqueue) still accepting items?
    pub fn is_accepting(&self) -> bool {
        self.shared.gate().sender.is_some()
    }

    pub fn stats(&self) -> Stats {
        let pending = self.shared.gate().timers.len();
        self.shared.counters.snapshot(pending)
    }

    /// Number of armed retry timers.
    pub fn pending_retries(&self) -> usize {
        self.shared.gate().timers.len()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        match self.shared.lifecycle.load(Ordering::SeqCst) {
            RUNNING => Lifecycle::Running,
            STOPPING => Lifecycle::Stopping,
            _ => Lifecycle::Stopped,
        }
    }

    fn is_idle(&self) -> bool {
        let pending = self.pending_retries();
        self.shared.counters.outstanding() <= 0
            && pending == 0
            && self.shared.counters.snapshot(pending).is_idle()
    }

    /// Poll until nothing is queued, in flight, or waiting on a retry timer.
    ///
    /// Returns `false` if that does not happen within `timeout`.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    }

    /// Stop the engine: cancel pending retries, close admission, drain the
    /// channel through the workers, then cancel the shared token.
    ///
    /// Only the first call does anything. Concurrent callers wait for that
    /// call to finish.
    pub async fn stop(&self) {
        let mut workers = self.workers.lock().await;
        let Some(handles) = workers.take() else {
            return;
        };

        self.shared.lifecycle.store(STOPPING, Ordering::SeqCst);
        let cancelled = self.shared.close();
        info!(cancelled_retries = cancelled, "engine stopping, draining");

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker terminated abnormally");
            }
        }

        self.shared.cancel.cancel();
        self.shared.lifecycle.store(STOPPED, Ordering::SeqCst);
        info!(stats = ?self.stats(), "engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Without a stop() the workers would wait on the channel forever.
        if self.shared.lifecycle.load(Ordering::SeqCst) == RUNNING {
            self.shared.close();
            self.shared.cancel.cancel();
        }
    }
}

struct Shared {
    retry: RetryPolicy,
    dead_letter: Option<DeadLetterSink>,
    counters: Counters,
    gate: Mutex<Gate>,
    lifecycle: AtomicU8,
    cancel: CancellationToken,
    next_timer: AtomicU64,
}

/// Admission state. The sender and the timer set share one lock so that
/// "still running?" and "arm a retry" are a single atomic step. A sender
/// cloned before `close()` still delivers; workers drain until every clone
/// is dropped.
struct Gate {
    sender: Option<mpsc::Sender<WorkItem>>,
    timers: HashMap<String, PendingRetry>,
}

struct PendingRetry {
    seq: u64,
    handle: AbortHandle,
}

impl Shared {
    fn gate(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the engine's sender and cancel every pending retry.
    ///
    /// Returns the number of retries cancelled.
    fn close(&self) -> usize {
        let mut gate = self.gate();
        gate.sender = None;
        let mut cancelled = 0;
        for (id, pending) in gate.timers.drain() {
            pending.handle.abort();
            self.counters.retired();
            debug!(%id, "pending retry cancelled");
            cancelled += 1;
        }
        cancelled
    }

    /// Failure path: retry with backoff or dead-letter.
    fn on_failure(self: &Arc<Self>, mut item: WorkItem) {
        item.attempts += 1;

        if self.retry.is_exhausted(item.attempts) {
            warn!(id = %item.id, attempts = item.attempts, "retries exhausted, dead-lettering");
            self.counters.dead_lettered();
            metrics::work_dead_lettered().add(1, &[]);
            if let Some(sink) = &self.dead_letter {
                sink(&item.id);
            }
            self.counters.retired();
            return;
        }

        let delay = self.retry.delay_for(item.attempts);
        let mut gate = self.gate();
        let Some(sender) = gate.sender.clone() else {
            drop(gate);
            warn!(id = %item.id, attempts = item.attempts, "engine stopped, discarding retry");
            self.counters.retired();
            return;
        };

        if gate.timers.contains_key(&item.id) {
            // Only reachable when callers reuse ids for concurrent items.
            self.counters.readmitted();
            drop(gate);
            warn!(id = %item.id, "retry already pending for id, re-admitting now");
            let shared = Arc::clone(self);
            tokio::spawn(async move { shared.deliver(sender, item).await });
            return;
        }
        drop(sender);

        let seq = self.next_timer.fetch_add(1, Ordering::Relaxed);
        let id = item.id.clone();
        let attempts = item.attempts;
        let shared = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.fire(seq, item).await;
        });
        gate.timers.insert(
            id.clone(),
            PendingRetry {
                seq,
                handle: handle.abort_handle(),
            },
        );
        drop(gate);

        debug!(%id, attempts, delay_ms = delay.as_millis() as u64, "retry scheduled");
        metrics::retry_scheduled().add(1, &[]);
    }

    /// Timer callback: re-admit unless the engine stopped in the meantime.
    async fn fire(self: Arc<Self>, seq: u64, item: WorkItem) {
        let sender = {
            let mut gate = self.gate();
            let armed = gate
                .timers
                .get(&item.id)
                .is_some_and(|pending| pending.seq == seq);
            if !armed {
                // Cancelled by close(), which already retired the item.
                return;
            }
            gate.timers.remove(&item.id);
            match gate.sender.clone() {
                Some(sender) => {
                    self.counters.readmitted();
                    sender
                }
                None => {
                    self.counters.retired();
                    return;
                }
            }
        };
        self.deliver(sender, item).await;
    }

    async fn deliver(&self, sender: mpsc::Sender<WorkItem>, item: WorkItem) {
        if let Err(mpsc::error::SendError(item)) = sender.send(item).await {
            warn!(id = %item.id, "work channel closed, dropping retry");
            self.counters.unbuffered();
            self.counters.retired();
        }
    }
}

async fn worker_loop(
    index: usize,
    shared: Arc<Shared>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<WorkItem>>>,
    processor: Arc<dyn Processor>,
) {
    debug!(worker = index, "worker started");

    loop {
        let next = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                _ = shared.cancel.cancelled() => None,
                item = receiver.recv() => item,
            }
        };
        let Some(mut item) = next else {
            break;
        };

        if item.is_empty() {
            shared.counters.unbuffered();
            shared.counters.retired();
            continue;
        }
        shared.counters.dequeued();

        let attempt = item.attempts + 1;
        let span = start_work_span(&item.id, attempt);
        let started = Instant::now();
        let outcome = AssertUnwindSafe(processor.process(&shared.cancel, &mut item))
            .catch_unwind()
            .instrument(span.clone())
            .await
            .unwrap_or_else(|panic| {
                Err(anyhow!("processor panicked: {}", panic_message(&*panic)))
            });
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "work.process")],
        );

        match outcome {
            Ok(()) => {
                record_outcome(&span, "processed");
                shared.counters.succeeded();
                metrics::work_processed().add(1, &[]);
            }
            Err(e) => {
                record_outcome(&span, "failed");
                warn!(worker = index, id = %item.id, attempt, error = %e, "processing failed");
                shared.counters.failed();
                metrics::work_failed().add(1, &[]);
                shared.on_failure(item);
            }
        }
    }

    debug!(worker = index, "worker exited");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
