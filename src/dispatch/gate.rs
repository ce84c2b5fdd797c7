//! Per-batch completion gate
//!
//! A gate for a batch of `n` calls hands out exactly `n` tokens. Each token
//! releases one slot when dropped, so every exit path of a processor (success,
//! error, timeout, dedup skip, even a panic) opens its slot exactly once.
//! [`CycleGate::wait`] resolves when all slots are open; a gate for an empty
//! batch is open from the start.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

#[derive(Debug)]
struct GateState {
    remaining: AtomicUsize,
    opened: Notify,
}

/// Waits for every call of a batch to finish
#[derive(Debug, Clone)]
pub struct CycleGate {
    state: Arc<GateState>,
}

/// One outstanding slot of a [`CycleGate`]
#[derive(Debug)]
pub struct GateToken {
    state: Arc<GateState>,
}

impl CycleGate {
    /// Create a gate for `size` calls along with one token per call
    #[must_use]
    pub fn new(size: usize) -> (Self, Vec<GateToken>) {
        let state = Arc::new(GateState {
            remaining: AtomicUsize::new(size),
            opened: Notify::new(),
        });
        let tokens = (0..size)
            .map(|_| GateToken {
                state: Arc::clone(&state),
            })
            .collect();
        (Self { state }, tokens)
    }

    /// Slots still outstanding
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.state.remaining.load(Ordering::Acquire)
    }

    /// Resolve once every token has been released
    pub async fn wait(&self) {
        loop {
            let opened = self.state.opened.notified();
            if self.remaining() == 0 {
                return;
            }
            opened.await;
        }
    }
}

impl GateToken {
    /// Release this slot
    pub fn release(self) {}
}

impl Drop for GateToken {
    fn drop(&mut self) {
        if self.state.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.state.opened.notify_waiters();
        }
    }
}
