//! In-flight call tracking
//!
//! At most one call per [`CallKey`] runs at any instant. A successful
//! [`InFlightSet::try_acquire`] returns a guard that removes the key when
//! dropped. Per-key request and response counters survive across cycles and
//! feed diagnostics only.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::call::CallKey;

#[derive(Debug, Default)]
struct Counts {
    requests: u64,
    responses: u64,
    since: Option<Instant>,
}

#[derive(Debug, Default)]
struct State {
    pending: usize,
    keys: HashMap<CallKey, Counts>,
}

/// Keys of calls issued but not yet answered
#[derive(Debug, Default)]
pub struct InFlightSet {
    state: Mutex<State>,
}

/// Diagnostic view of one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStatus {
    pub call_id: String,
    pub device: String,
    pub data_source_id: String,
    pub requests: u64,
    pub responses: u64,
    pub in_flight: bool,

    /// How long the current call has been outstanding
    pub pending_ms: Option<u64>,
}

impl InFlightSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a request for `key` and claim it unless a call is outstanding
    ///
    /// Returns `None` when the key is already in flight.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>, key: &CallKey) -> Option<InFlightGuard> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let counts = state.keys.entry(key.clone()).or_default();
        counts.requests += 1;

        if counts.since.is_some() {
            return None;
        }
        counts.since = Some(Instant::now());
        state.pending += 1;

        Some(InFlightGuard {
            set: Arc::clone(self),
            key: key.clone(),
        })
    }

    fn release(&self, key: &CallKey) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(counts) = state.keys.get_mut(key) {
            if counts.since.take().is_some() {
                counts.responses += 1;
                state.pending -= 1;
            }
        }
    }

    #[must_use]
    pub fn contains(&self, key: &CallKey) -> bool {
        self.lock()
            .keys
            .get(key)
            .is_some_and(|c| c.since.is_some())
    }

    /// Number of calls currently outstanding
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().pending
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn requests(&self, key: &CallKey) -> u64 {
        self.lock().keys.get(key).map_or(0, |c| c.requests)
    }

    #[must_use]
    pub fn responses(&self, key: &CallKey) -> u64 {
        self.lock().keys.get(key).map_or(0, |c| c.responses)
    }

    /// One line per key: requests, responses and whether it is outstanding
    #[must_use]
    pub fn summarize_counts(&self) -> String {
        let state = self.lock();
        let mut out = format!("{} call(s) in flight", state.pending);
        for (key, counts) in &state.keys {
            let _ = write!(
                out,
                "\n  {key} {}/{}: req={} resp={} ({:.1}%){}",
                key.device(),
                key.data_source_id(),
                counts.requests,
                counts.responses,
                completion(counts),
                if counts.since.is_some() { " (pending)" } else { "" }
            );
        }
        out
    }

    /// Per-key status, outstanding calls first
    #[must_use]
    pub fn snapshot(&self) -> Vec<KeyStatus> {
        let state = self.lock();
        let mut statuses: Vec<KeyStatus> = state
            .keys
            .iter()
            .map(|(key, counts)| KeyStatus {
                call_id: key.short_id(),
                device: key.device().to_string(),
                data_source_id: key.data_source_id().to_string(),
                requests: counts.requests,
                responses: counts.responses,
                in_flight: counts.since.is_some(),
                pending_ms: counts
                    .since
                    .map(|since| u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)),
            })
            .collect();
        statuses.sort_by(|a, b| {
            b.in_flight
                .cmp(&a.in_flight)
                .then_with(|| a.call_id.cmp(&b.call_id))
        });
        statuses
    }

    /// Longest time any current call has been outstanding
    #[must_use]
    pub fn oldest(&self) -> Option<Duration> {
        self.lock()
            .keys
            .values()
            .filter_map(|c| c.since.map(|s| s.elapsed()))
            .max()
    }
}

#[allow(clippy::cast_precision_loss)]
fn completion(counts: &Counts) -> f64 {
    if counts.requests == 0 {
        return 0.0;
    }
    counts.responses as f64 / counts.requests as f64 * 100.0
}

/// Claim on one in-flight key; releases it when dropped
#[derive(Debug)]
pub struct InFlightGuard {
    set: Arc<InFlightSet>,
    key: CallKey,
}

impl InFlightGuard {
    #[must_use]
    pub const fn key(&self) -> &CallKey {
        &self.key
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.release(&self.key);
    }
}
