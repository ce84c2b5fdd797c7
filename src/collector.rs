//! Synchronous batch collection
//!
//! [`Collector::collect`] takes a batch of descriptors for one agent, opens a
//! single connection, runs every call under one batch deadline and answers
//! with a flat list of value and error entries in descriptor order. Nothing is
//! retried and nothing is deduplicated here; the periodic path lives in
//! [`crate::dispatch`].

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::Semaphore;
use tokio::time::{Instant, timeout_at};

use crate::agent::{AgentClient, AgentConnector};
use crate::call::{Call, CallFactory, Summary};
use crate::descriptor::RawDescriptor;
use crate::report::{Entry, Failure};
use crate::{Error, Result};

/// Time a close may take once the batch deadline has passed
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Facade settings
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    /// Run the calls of a batch concurrently instead of one after another
    pub concurrent: bool,

    /// Concurrency bound for concurrent batches
    pub pool_size: usize,

    /// Deadline for a whole batch, connection included
    pub batch_timeout: Duration,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            concurrent: false,
            pool_size: 10,
            batch_timeout: Duration::from_secs(60),
        }
    }
}

/// Collects batches of descriptors against one agent at a time
pub struct Collector {
    connector: Arc<dyn AgentConnector>,
    settings: CollectorSettings,
    pool: OnceLock<Arc<Semaphore>>,
}

impl Collector {
    #[must_use]
    pub fn new(connector: Arc<dyn AgentConnector>, settings: CollectorSettings) -> Self {
        Self {
            connector,
            settings,
            pool: OnceLock::new(),
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    fn pool(&self) -> Arc<Semaphore> {
        Arc::clone(
            self.pool
                .get_or_init(|| Arc::new(Semaphore::new(self.settings.pool_size.max(1)))),
        )
    }

    /// Collect a batch of descriptors
    ///
    /// All descriptors are expected to target the same agent; the connection
    /// parameters of the first valid one are used. Entries come back in
    /// descriptor order, each descriptor contributing its values or one error.
    /// A failed close is reported as an extra connection error at the end; the
    /// close shares the batch deadline, with a short grace once it has passed.
    pub async fn collect(&self, descriptors: Vec<RawDescriptor>) -> Vec<Entry> {
        if descriptors.is_empty() {
            return Vec::new();
        }

        let deadline = Instant::now() + self.settings.batch_timeout;
        let mut slots: Vec<Vec<Entry>> = vec![Vec::new(); descriptors.len()];
        let mut calls: Vec<(usize, Call)> = Vec::with_capacity(descriptors.len());

        for (slot, raw) in descriptors.into_iter().enumerate() {
            match CallFactory::from_raw(raw.clone()) {
                Ok(call) => calls.push((slot, call)),
                Err(err) => {
                    tracing::warn!(data_source = ?raw.id, error = %err, "rejecting descriptor");
                    slots[slot].push(Entry::Error(Failure::for_raw(&raw, &err)));
                }
            }
        }

        let Some((_, first)) = calls.first() else {
            return slots.into_iter().flatten().collect();
        };
        let target = first.descriptor().target.clone();
        let credentials = first.descriptor().credentials.clone();
        let device = first.descriptor().device.clone();

        tracing::debug!(%target, calls = calls.len(), concurrent = self.settings.concurrent, "collecting batch");

        let connected = timeout_at(
            deadline,
            self.connector.connect(&target, credentials.as_ref()),
        )
        .await
        .unwrap_or_else(|_| Err(Error::Connection(format!("timed out connecting to {target}"))));

        let client = match connected {
            Ok(client) => client,
            Err(err) => {
                tracing::warn!(%target, error = %err, "unable to connect to agent");
                let err = match err {
                    Error::Connection(_) => err,
                    other => Error::Connection(other.to_string()),
                };
                for (slot, call) in &calls {
                    slots[*slot].push(Entry::Error(Failure::for_call(call, &err)));
                }
                return slots.into_iter().flatten().collect();
            }
        };

        let outcomes = if self.settings.concurrent {
            self.run_concurrent(client.as_ref(), &calls, deadline).await
        } else {
            run_serial(client.as_ref(), &calls, deadline).await
        };

        for (position, outcome) in outcomes {
            let (slot, call) = &calls[position];
            match outcome {
                Ok(summary) => slots[*slot].extend(summary.entries()),
                Err(err) => {
                    tracing::debug!(call_id = %call.key(), error = %err, "call failed");
                    slots[*slot].push(Entry::Error(Failure::for_call(call, &err)));
                }
            }
        }

        let mut entries: Vec<Entry> = slots.into_iter().flatten().collect();

        let close_by = deadline.max(Instant::now() + CLOSE_GRACE);
        let closed = timeout_at(close_by, client.close())
            .await
            .unwrap_or_else(|_| Err(Error::Connection("timed out".to_string())));
        if let Err(e) = closed {
            tracing::warn!(%target, error = %e, "failed to close agent connection");
            entries.push(Entry::Error(Failure::connection(
                &device,
                format!("error closing connection to {target}: {e}"),
            )));
        }

        entries
    }

    async fn run_concurrent(
        &self,
        client: &dyn AgentClient,
        calls: &[(usize, Call)],
        deadline: Instant,
    ) -> Vec<(usize, Result<Summary>)> {
        let pool = self.pool();
        let mut pending: FuturesUnordered<_> = calls
            .iter()
            .enumerate()
            .map(|(position, (_, call))| {
                let pool = Arc::clone(&pool);
                async move {
                    let outcome = timeout_at(deadline, async {
                        let _permit = pool.acquire().await.map_err(|_| Error::Shutdown)?;
                        call.execute(client).await
                    })
                    .await
                    .unwrap_or_else(|_| Err(timed_out(call)));
                    (position, outcome)
                }
            })
            .collect();

        let mut outcomes = Vec::with_capacity(calls.len());
        while let Some(outcome) = pending.next().await {
            outcomes.push(outcome);
        }
        outcomes
    }
}

async fn run_serial(
    client: &dyn AgentClient,
    calls: &[(usize, Call)],
    deadline: Instant,
) -> Vec<(usize, Result<Summary>)> {
    let mut outcomes = Vec::with_capacity(calls.len());
    for (position, (_, call)) in calls.iter().enumerate() {
        let outcome = timeout_at(deadline, call.execute(client))
            .await
            .unwrap_or_else(|_| Err(timed_out(call)));
        outcomes.push((position, outcome));
    }
    outcomes
}

/// Timeout error for a call cut off by the batch deadline
fn timed_out(call: &Call) -> Error {
    let summary = call.blank_summary().into_cancelled();
    tracing::warn!(call_id = %summary.call_id, "call cancelled at batch deadline");
    Error::Timeout(format!(
        "{} did not complete before the batch deadline",
        summary.call_summary
    ))
}
