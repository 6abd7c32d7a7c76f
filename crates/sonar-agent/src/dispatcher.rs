//! Per-namespace event dispatch
//!
//! A single dispatcher task owns one worker per namespace. Each worker
//! drains a bounded queue and handles its events one at a time, so events
//! for the same namespace are applied in the order they were observed while
//! different namespaces proceed in parallel.
//!
//! Workers are retired when their namespace is deleted or after sitting idle
//! with an empty queue. A retired worker's handle is kept as the predecessor
//! of the next worker for that namespace, which waits for it before handling
//! anything, so retirement never reorders events.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sonar_common::metrics;

use crate::controller::{handle_event, Context};
use crate::event::ReconciliationEvent;

/// Default per-namespace queue depth
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default idle time before a worker is retired
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Lower bound on the idle sweep period
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Something that consumes reconciliation events
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one event; failures are the handler's to report
    async fn handle(&self, event: ReconciliationEvent);
}

#[async_trait]
impl EventHandler for Context {
    async fn handle(&self, event: ReconciliationEvent) {
        handle_event(&event, self).await;
    }
}

/// Dispatcher tuning
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Bounded queue depth per namespace worker
    pub queue_capacity: usize,
    /// Idle time after which a worker with an empty queue is retired
    pub idle_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

struct Worker {
    tx: mpsc::Sender<ReconciliationEvent>,
    handle: JoinHandle<()>,
    last_used: Instant,
}

impl Worker {
    fn is_idle(&self, idle_timeout: Duration) -> bool {
        self.last_used.elapsed() >= idle_timeout && self.tx.capacity() == self.tx.max_capacity()
    }
}

/// Routes events to per-namespace workers
pub struct Dispatcher<H: EventHandler> {
    handler: Arc<H>,
    config: DispatcherConfig,
    workers: HashMap<String, Worker>,
    /// Handles of retired workers not yet awaited by a successor
    predecessors: HashMap<String, JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl<H: EventHandler> Dispatcher<H> {
    /// Create a dispatcher handing events to `handler`
    pub fn new(handler: Arc<H>, config: DispatcherConfig, shutdown: CancellationToken) -> Self {
        Self {
            handler,
            config,
            workers: HashMap::new(),
            predecessors: HashMap::new(),
            shutdown,
        }
    }

    /// Number of live workers
    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }

    /// Dispatch events until the input closes or shutdown is requested,
    /// then wait for every worker to finish
    pub async fn run(mut self, mut events: mpsc::Receiver<ReconciliationEvent>) {
        let period = (self.config.idle_timeout / 2).max(MIN_SWEEP_INTERVAL);
        let mut sweep = tokio::time::interval(period);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            queue_capacity = self.config.queue_capacity,
            idle_timeout_secs = self.config.idle_timeout.as_secs(),
            "Dispatcher started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested, stopping dispatcher");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event).await,
                    None => {
                        info!("Event sources closed, stopping dispatcher");
                        break;
                    }
                },
                _ = sweep.tick() => self.retire_idle(),
            }
        }

        self.drain().await;
    }

    async fn dispatch(&mut self, event: ReconciliationEvent) {
        let Some(key) = event.namespace_key().map(str::to_string) else {
            warn!(resource = event.resource(), "Dropping event without a namespace");
            return;
        };
        let retire = event.is_namespace_deletion();

        let mut pending = Some(event);
        // A second attempt goes to a freshly spawned worker
        for _ in 0..2 {
            let Some(event) = pending.take() else { break };
            if !self.workers.contains_key(&key) {
                let worker = self.spawn_worker(&key);
                self.workers.insert(key.clone(), worker);
            }
            let Some(worker) = self.workers.get_mut(&key) else { break };

            match worker.tx.send(event).await {
                Ok(()) => worker.last_used = Instant::now(),
                Err(mpsc::error::SendError(event)) => {
                    warn!(namespace = %key, "Worker exited unexpectedly, respawning");
                    if let Some(dead) = self.workers.remove(&key) {
                        self.predecessors.insert(key.clone(), dead.handle);
                    }
                    pending = Some(event);
                }
            }
        }
        if pending.is_some() {
            error!(namespace = %key, "Failed to deliver event to a worker");
        }

        if retire {
            self.retire(&key);
        }
        self.record_workers();
    }

    fn spawn_worker(&mut self, key: &str) -> Worker {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let predecessor = self.predecessors.remove(key);
        let handler = self.handler.clone();
        let handle = tokio::spawn(run_worker(key.to_string(), rx, predecessor, handler));
        debug!(namespace = %key, "Spawned namespace worker");

        Worker {
            tx,
            handle,
            last_used: Instant::now(),
        }
    }

    /// Close a worker's queue; it exits once the queue drains
    fn retire(&mut self, key: &str) {
        if let Some(worker) = self.workers.remove(key) {
            debug!(namespace = %key, "Retiring namespace worker");
            self.predecessors.insert(key.to_string(), worker.handle);
        }
    }

    fn retire_idle(&mut self) {
        let idle: Vec<String> = self
            .workers
            .iter()
            .filter(|(_, w)| w.is_idle(self.config.idle_timeout))
            .map(|(key, _)| key.clone())
            .collect();
        for key in idle {
            self.retire(&key);
        }

        self.predecessors.retain(|_, handle| !handle.is_finished());
        self.record_workers();
    }

    async fn drain(&mut self) {
        let workers: Vec<(String, JoinHandle<()>)> = self
            .workers
            .drain()
            .map(|(key, w)| (key, w.handle))
            .chain(self.predecessors.drain())
            .collect();

        for (key, handle) in workers {
            if let Err(e) = handle.await {
                warn!(namespace = %key, error = %e, "Worker ended abnormally");
            }
        }
        self.record_workers();
        info!("Dispatcher stopped");
    }

    fn record_workers(&self) {
        metrics::ACTIVE_WORKERS.record(self.workers.len() as u64, &[]);
    }
}

async fn run_worker<H: EventHandler>(
    namespace: String,
    mut rx: mpsc::Receiver<ReconciliationEvent>,
    predecessor: Option<JoinHandle<()>>,
    handler: Arc<H>,
) {
    if let Some(predecessor) = predecessor {
        if let Err(e) = predecessor.await {
            warn!(namespace = %namespace, error = %e, "Previous worker ended abnormally");
        }
    }

    while let Some(event) = rx.recv().await {
        if AssertUnwindSafe(handler.handle(event))
            .catch_unwind()
            .await
            .is_err()
        {
            error!(namespace = %namespace, "Event handler panicked");
        }
    }
    debug!(namespace = %namespace, "Namespace worker exited");
}
