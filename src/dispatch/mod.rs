//! Periodic collection dispatcher
//!
//! The dispatcher keeps the latest descriptor inventory, turns it into a batch
//! of calls every cycle and runs them with bounded concurrency:
//!
//! ```text
//!  refresh ──► descriptors ──► injection ──► dispatch(batch)
//!                                              │
//!                  ┌───────────────────────────┼──────────────────┐
//!                  ▼                           ▼                  ▼
//!            query task (N)  ──oneshot──►  processor (2N)   batch observer
//!            connect/execute               timeout, sink    gate ─► heartbeat
//! ```
//!
//! A call whose key is still in flight from an earlier batch is skipped, not
//! queued. Every processor releases its call key and its gate slot on every
//! path, so one slow or failing call never wedges later cycles. A call still
//! queued for the query pool when its processor times out is never issued, and
//! a result that arrives after its processor timed out is dropped.

mod gate;
mod inflight;

pub use gate::{CycleGate, GateToken};
pub use inflight::{InFlightGuard, InFlightSet, KeyStatus};

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::{Notify, Semaphore, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::agent::AgentConnector;
use crate::call::{Call, CallFactory, CallKey, Summary};
use crate::controller::{Controller, DESCRIPTOR_KIND, Heartbeat, ResultSink};
use crate::descriptor::RawDescriptor;
use crate::report::Failure;
use crate::{Error, Result};

/// Heartbeat timeout, in cycles
const HEARTBEAT_CYCLES: u64 = 3;

const DEFAULT_CYCLE_SECS: u64 = 300;

/// Dispatcher settings
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Name this collector registers under at the controller
    pub collector_name: String,

    /// Component reported in heartbeats
    pub component_name: String,

    /// Descriptor kind requested from the controller
    pub descriptor_kind: String,

    /// Query concurrency; result processing gets twice as much
    pub pool_size: usize,

    /// How long a processor waits for its call
    pub call_timeout: Duration,

    /// Cycle length; the controller's sampling interval when unset
    pub cycle_interval: Option<Duration>,

    /// Descriptor refresh period; the controller's setting when unset
    pub refresh_interval: Option<Duration>,

    /// Keep cycling, or stop after one batch
    pub continuous: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            collector_name: "localhost".to_string(),
            component_name: "mbean-collector".to_string(),
            descriptor_kind: DESCRIPTOR_KIND.to_string(),
            pool_size: 10,
            call_timeout: Duration::from_secs(30),
            cycle_interval: None,
            refresh_interval: None,
            continuous: false,
        }
    }
}

/// A dispatched batch
#[derive(Debug)]
pub struct BatchHandle {
    scheduled: usize,
    skipped: usize,
    done: JoinHandle<()>,
}

impl BatchHandle {
    /// Calls handed to the query pool
    #[must_use]
    pub const fn scheduled(&self) -> usize {
        self.scheduled
    }

    /// Calls skipped because their key was still in flight
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.skipped
    }

    /// Resolve once every call of the batch has finished and the cycle
    /// heartbeat has been sent
    pub async fn wait(self) {
        if let Err(e) = self.done.await {
            tracing::warn!(error = %e, "batch observer failed");
        }
    }
}

/// Periodic collection dispatcher
pub struct Dispatcher {
    config: DispatcherConfig,
    controller: Arc<dyn Controller>,
    connector: Arc<dyn AgentConnector>,
    sink: Arc<dyn ResultSink>,
    query_pool: Arc<Semaphore>,
    result_pool: Arc<Semaphore>,
    in_flight: Arc<InFlightSet>,
    descriptors: RwLock<Option<Arc<Vec<RawDescriptor>>>>,
    cycle_secs: Arc<AtomicU64>,
    inject_tx: UnboundedSender<()>,
    heartbeat_tx: UnboundedSender<oneshot::Sender<()>>,
    schedulers: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
    finished: Notify,
}

impl Dispatcher {
    /// Create a dispatcher and start its heartbeat and injection workers
    ///
    /// Must be called from within a Tokio runtime. Nothing is collected until
    /// [`Dispatcher::start`], [`Dispatcher::inject`] or
    /// [`Dispatcher::dispatch`] is called.
    #[must_use]
    pub fn new(
        config: DispatcherConfig,
        controller: Arc<dyn Controller>,
        connector: Arc<dyn AgentConnector>,
        sink: Arc<dyn ResultSink>,
    ) -> Arc<Self> {
        let pool_size = config.pool_size.max(1);
        let (inject_tx, inject_rx) = unbounded_channel();
        let (heartbeat_tx, heartbeat_rx) = unbounded_channel();
        let cycle_secs = Arc::new(AtomicU64::new(
            config
                .cycle_interval
                .map_or(DEFAULT_CYCLE_SECS, |d| d.as_secs().max(1)),
        ));

        let heartbeat = tokio::spawn(heartbeat_loop(
            heartbeat_rx,
            Arc::clone(&controller),
            config.collector_name.clone(),
            config.component_name.clone(),
            Arc::clone(&cycle_secs),
        ));

        let dispatcher = Arc::new(Self {
            config,
            controller,
            connector,
            sink,
            query_pool: Arc::new(Semaphore::new(pool_size)),
            result_pool: Arc::new(Semaphore::new(pool_size * 2)),
            in_flight: Arc::new(InFlightSet::new()),
            descriptors: RwLock::new(None),
            cycle_secs,
            inject_tx,
            heartbeat_tx,
            schedulers: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            finished: Notify::new(),
        });

        let injection = tokio::spawn(injection_loop(inject_rx, Arc::downgrade(&dispatcher)));
        dispatcher.track(heartbeat);
        dispatcher.track(injection);
        dispatcher
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.schedulers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    #[must_use]
    pub const fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Shared in-flight tracker, for diagnostics
    #[must_use]
    pub fn in_flight(&self) -> Arc<InFlightSet> {
        Arc::clone(&self.in_flight)
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Current heartbeat timeout
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(
            self.cycle_secs
                .load(Ordering::Relaxed)
                .saturating_mul(HEARTBEAT_CYCLES),
        )
    }

    /// Fetch cycle settings and descriptors, then start the schedulers
    ///
    /// A failed initial descriptor fetch is logged; the refresh scheduler
    /// retries it.
    ///
    /// # Errors
    ///
    /// Returns error if the dispatcher is stopped or the cycle settings cannot
    /// be fetched.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.is_stopped() {
            return Err(Error::Shutdown);
        }

        tracing::info!("retrieving cycle configuration");
        let cycle = self
            .controller
            .fetch_cycle_config(&self.config.collector_name)
            .await?;

        let cycle_period = self
            .config
            .cycle_interval
            .unwrap_or_else(|| Duration::from_secs(cycle.sampling_interval_seconds.max(1)));
        let refresh_period = self.config.refresh_interval.unwrap_or_else(|| {
            Duration::from_secs(cycle.descriptor_refresh_interval_minutes.max(1) * 60)
        });
        self.cycle_secs
            .store(cycle_period.as_secs().max(1), Ordering::Relaxed);

        tracing::info!(
            cycle_secs = cycle_period.as_secs(),
            refresh_secs = refresh_period.as_secs(),
            pool_size = self.config.pool_size,
            continuous = self.config.continuous,
            "starting dispatcher"
        );

        if let Err(e) = self.refresh().await {
            tracing::warn!(error = %e, "initial descriptor fetch failed; retrying on next refresh");
        }

        self.track(tokio::spawn(refresh_loop(
            Arc::downgrade(self),
            refresh_period,
        )));
        if self.config.continuous {
            self.track(tokio::spawn(cycle_loop(self.inject_tx.clone(), cycle_period)));
        }

        Ok(())
    }

    /// Pull the descriptor inventory from the controller
    ///
    /// Returns whether the inventory changed.
    ///
    /// # Errors
    ///
    /// Returns error if the controller request fails
    pub async fn refresh(&self) -> Result<bool> {
        tracing::debug!("refreshing descriptors");
        let descriptors = self
            .controller
            .fetch_descriptors(&self.config.collector_name, &self.config.descriptor_kind)
            .await?;
        Ok(self.update_descriptors(descriptors))
    }

    /// Replace the descriptor inventory
    ///
    /// An unchanged inventory is ignored. A changed one is swapped in as a
    /// whole and an injection is scheduled immediately. Returns whether the
    /// inventory changed.
    pub fn update_descriptors(&self, descriptors: Vec<RawDescriptor>) -> bool {
        let count = descriptors.len();
        {
            let mut current = self
                .descriptors
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if current.as_deref().is_some_and(|c| *c == descriptors) {
                tracing::debug!(count, "descriptors unchanged");
                return false;
            }
            *current = Some(Arc::new(descriptors));
        }

        tracing::info!(count, "descriptors changed; scheduling collection");
        if self.inject_tx.send(()).is_err() {
            tracing::debug!("injection scheduler stopped; not scheduling");
        }
        true
    }

    /// Snapshot of the current descriptor inventory
    #[must_use]
    pub fn descriptors(&self) -> Option<Arc<Vec<RawDescriptor>>> {
        self.descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Build a batch from the current inventory and dispatch it
    ///
    /// Malformed descriptors are reported to the sink as configuration
    /// failures. Descriptors that map to the same call key are collapsed to
    /// one call. Returns `None` when no inventory has been loaded yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shutdown`] if the dispatcher is stopped.
    pub async fn inject(&self) -> Result<Option<BatchHandle>> {
        let Some(descriptors) = self.descriptors() else {
            tracing::warn!("no descriptors loaded; skipping collection cycle");
            return Ok(None);
        };

        let mut calls: IndexMap<CallKey, Call> = IndexMap::with_capacity(descriptors.len());
        for raw in descriptors.iter() {
            match CallFactory::from_raw(raw.clone()) {
                Ok(call) => {
                    if calls.contains_key(call.key()) {
                        tracing::debug!(call_id = %call.key(), "duplicate call in batch; collapsing");
                    } else {
                        calls.insert(call.key().clone(), call);
                    }
                }
                Err(err) => {
                    tracing::warn!(data_source = ?raw.id, error = %err, "rejecting descriptor");
                    if let Err(e) = self.sink.post_failure(&Failure::for_raw(raw, &err)).await {
                        tracing::warn!(error = %e, "failed to report rejected descriptor");
                    }
                }
            }
        }

        tracing::info!(calls = calls.len(), "injecting collection cycle");
        self.dispatch(calls.into_values().collect()).map(Some)
    }

    /// Dispatch a batch of calls
    ///
    /// Returns immediately; the handle resolves when the batch completes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shutdown`] if the dispatcher is stopped.
    pub fn dispatch(&self, calls: Vec<Call>) -> Result<BatchHandle> {
        if self.is_stopped() {
            return Err(Error::Shutdown);
        }

        let (gate, tokens) = CycleGate::new(calls.len());
        let mut scheduled = 0;
        let mut skipped = 0;

        for (call, token) in calls.into_iter().zip(tokens) {
            let Some(claim) = self.in_flight.try_acquire(call.key()) else {
                tracing::warn!(
                    call_id = %call.key(),
                    device = %call.descriptor().device,
                    data_source = %call.descriptor().data_source_id,
                    "previously issued call has not completed; skipping"
                );
                token.release();
                skipped += 1;
                continue;
            };

            scheduled += 1;
            let call = Arc::new(call);
            let (tx, rx) = oneshot::channel();

            tokio::spawn(query(
                Arc::clone(&call),
                Arc::clone(&self.connector),
                Arc::clone(&self.query_pool),
                tx,
            ));
            tokio::spawn(process(
                Processing {
                    call,
                    claim,
                    token,
                    rx,
                },
                Arc::clone(&self.result_pool),
                Arc::clone(&self.sink),
                self.config.call_timeout,
            ));
        }

        tracing::debug!(scheduled, skipped, "batch dispatched");
        tracing::trace!(counts = %self.in_flight.summarize_counts(), "in-flight calls");

        let heartbeat_tx = self.heartbeat_tx.clone();
        let done = tokio::spawn(async move {
            gate.wait().await;
            tracing::debug!("batch complete; sending heartbeat");
            let (ack, sent) = oneshot::channel();
            if heartbeat_tx.send(ack).is_ok() {
                let _ = sent.await;
            }
        });

        Ok(BatchHandle {
            scheduled,
            skipped,
            done,
        })
    }

    /// Stop every scheduler
    ///
    /// Calls already dispatched are left to finish.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!(in_flight = self.in_flight.len(), "stopping dispatcher");
        for handle in self
            .schedulers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            handle.abort();
        }
        self.finished.notify_waiters();
    }

    /// Resolve once the dispatcher has stopped
    pub async fn finished(&self) {
        loop {
            let stopped = self.finished.notified();
            if self.is_stopped() {
                return;
            }
            stopped.await;
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        for handle in self
            .schedulers
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            handle.abort();
        }
    }
}

/// Run one unit of scheduled work on its own task
///
/// Errors and panics are logged and never reach the caller.
async fn isolate<F, T>(unit: &'static str, work: F) -> Option<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::error!(unit, error = %e, "scheduled work failed");
            None
        }
        Err(e) => {
            tracing::error!(unit, error = %e, "scheduled work panicked");
            None
        }
    }
}

async fn heartbeat_loop(
    mut rx: UnboundedReceiver<oneshot::Sender<()>>,
    controller: Arc<dyn Controller>,
    device: String,
    component: String,
    cycle_secs: Arc<AtomicU64>,
) {
    while let Some(ack) = rx.recv().await {
        let heartbeat = Heartbeat {
            device: device.clone(),
            component: component.clone(),
            timeout_seconds: cycle_secs
                .load(Ordering::Relaxed)
                .saturating_mul(HEARTBEAT_CYCLES),
        };
        let controller = Arc::clone(&controller);
        isolate("heartbeat", async move {
            controller.post_heartbeat(&heartbeat).await
        })
        .await;
        let _ = ack.send(());
    }
}

async fn injection_loop(mut rx: UnboundedReceiver<()>, dispatcher: Weak<Dispatcher>) {
    while rx.recv().await.is_some() {
        let Some(current) = dispatcher.upgrade() else {
            break;
        };

        let worker = Arc::clone(&current);
        let batch = isolate("injection", async move { worker.inject().await })
            .await
            .flatten();

        if current.config.continuous {
            continue;
        }

        // One-shot mode: stop once the first batch and its heartbeat are done
        if let Some(batch) = batch {
            tokio::spawn(async move {
                batch.wait().await;
                tracing::info!("collection complete");
                current.stop();
            });
            break;
        }
    }
}

async fn refresh_loop(dispatcher: Weak<Dispatcher>, period: Duration) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let Some(current) = dispatcher.upgrade() else {
            break;
        };
        isolate("refresh", async move { current.refresh().await }).await;
    }
}

async fn cycle_loop(inject_tx: UnboundedSender<()>, period: Duration) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        tracing::debug!("cycle tick; scheduling collection");
        if inject_tx.send(()).is_err() {
            break;
        }
    }
}

async fn query(
    call: Arc<Call>,
    connector: Arc<dyn AgentConnector>,
    pool: Arc<Semaphore>,
    tx: oneshot::Sender<Result<Summary>>,
) {
    let outcome = match pool.acquire_owned().await {
        Ok(_permit) => {
            if tx.is_closed() {
                tracing::debug!(call_id = %call.key(), "processor gave up while call was queued; skipping");
                return;
            }
            call.run(connector.as_ref()).await
        }
        Err(_) => Err(Error::Shutdown),
    };

    if tx.send(outcome).is_err() {
        tracing::debug!(call_id = %call.key(), "result arrived after its processor gave up; dropped");
    }
}

/// Everything a processor owns for one call
struct Processing {
    call: Arc<Call>,
    claim: InFlightGuard,
    token: GateToken,
    rx: oneshot::Receiver<Result<Summary>>,
}

async fn process(
    work: Processing,
    pool: Arc<Semaphore>,
    sink: Arc<dyn ResultSink>,
    call_timeout: Duration,
) {
    let Processing {
        call,
        claim,
        token,
        rx,
    } = work;
    let _token = token;
    let _permit = pool.acquire_owned().await.ok();

    let outcome = tokio::time::timeout(call_timeout, rx).await;
    drop(claim);

    let call_id = call.key().short_id();
    let descriptor = call.descriptor();

    match outcome {
        Ok(Ok(Ok(summary))) => {
            tracing::info!(
                call_id = %call_id,
                device = %descriptor.device,
                data_source = %descriptor.data_source_id,
                runtime_ms = summary.runtime.as_millis(),
                "call succeeded"
            );
            if let Err(e) = sink.post_summary(&summary).await {
                tracing::error!(call_id = %call_id, error = %e, "failed to post results");
            }
        }
        Ok(Ok(Err(err))) => {
            tracing::warn!(
                call_id = %call_id,
                device = %descriptor.device,
                data_source = %descriptor.data_source_id,
                class = %err.class(),
                error = %err,
                "call failed"
            );
            if let Err(e) = sink.post_failure(&Failure::for_call(&call, &err)).await {
                tracing::error!(call_id = %call_id, error = %e, "failed to post failure");
            }
        }
        Ok(Err(_)) => {
            tracing::error!(call_id = %call_id, "call ended without producing a result");
            let err = Error::Query("call aborted before producing a result".to_string());
            if let Err(e) = sink.post_failure(&Failure::for_call(&call, &err)).await {
                tracing::error!(call_id = %call_id, error = %e, "failed to post failure");
            }
        }
        Err(_) => {
            tracing::warn!(
                call_id = %call_id,
                device = %descriptor.device,
                data_source = %descriptor.data_source_id,
                timeout_ms = call_timeout.as_millis(),
                "timeout occurred during request; discarding"
            );
        }
    }
}
