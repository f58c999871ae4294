//! State shared between the mutation pipeline and the reconciler.
//!
//! Polling is suspended while any local mutation is in flight and for a
//! cooldown window after the last one finishes. Inside that window a reader
//! may be stale by up to `cooldown`; this keeps an in-flight write from being
//! visibly reverted by a poll that raced it.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct PollControl {
    last_seen: AtomicU64,
    in_flight: AtomicUsize,
    cooldown: Duration,
    cooldown_until: Mutex<Option<Instant>>,
}

impl PollControl {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            last_seen: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            cooldown,
            cooldown_until: Mutex::new(None),
        }
    }

    /// Highest snapshot version this process has seen or written.
    pub fn last_seen(&self) -> u64 {
        self.last_seen.load(Ordering::SeqCst)
    }

    /// Record that `version` is known locally. Never lowers the mark.
    /// Returns true if the mark moved.
    pub fn observe(&self, version: u64) -> bool {
        self.last_seen.fetch_max(version, Ordering::SeqCst) < version
    }

    /// Mark a mutation as in flight until the guard is dropped.
    pub fn begin_mutation(self: &Arc<Self>) -> MutationGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        MutationGuard {
            control: Arc::clone(self),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Time left in the post-mutation cooldown, if any.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let until = *self.cooldown_until.lock().unwrap_or_else(|e| e.into_inner());
        until
            .and_then(|t| t.checked_duration_since(Instant::now()))
            .filter(|d| !d.is_zero())
    }

    pub fn is_suspended(&self) -> bool {
        self.in_flight() > 0 || self.cooldown_remaining().is_some()
    }

    fn finish_mutation(&self) {
        *self.cooldown_until.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(Instant::now() + self.cooldown);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Keeps polling suspended while alive; starts the cooldown on drop.
#[derive(Debug)]
pub struct MutationGuard {
    control: Arc<PollControl>,
}

impl Drop for MutationGuard {
    fn drop(&mut self) {
        self.control.finish_mutation();
    }
}
