//! Wake-up queue for durably sleeping instances.
//!
//! A min-heap of `(wake_at, instance_id)` behind a mutex, plus a `Notify`
//! that interrupts the background loop whenever an earlier deadline may have
//! been scheduled. Deadlines are wall-clock (`chrono::Utc`) because they are
//! persisted and must survive restarts.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Longest the loop waits before re-reading the wall clock.
const MAX_IDLE_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct TimerEntry {
    wake_at: DateTime<Utc>,
    instance_id: String,
}

#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: Mutex<BinaryHeap<Reverse<TimerEntry>>>,
    notify: Notify,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BinaryHeap<Reverse<TimerEntry>>> {
        self.heap.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a wake-up. Past deadlines fire on the next loop turn.
    pub fn schedule(&self, instance_id: &str, wake_at: DateTime<Utc>) {
        self.lock().push(Reverse(TimerEntry {
            wake_at,
            instance_id: instance_id.to_string(),
        }));
        self.notify.notify_one();
    }

    /// Remove and return every instance due at `now`, earliest first.
    pub fn pop_due(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut heap = self.lock();
        let mut due = Vec::new();
        while heap.peek().is_some_and(|Reverse(entry)| entry.wake_at <= now) {
            if let Some(Reverse(entry)) = heap.pop() {
                due.push(entry.instance_id);
            }
        }
        due
    }

    /// Earliest scheduled deadline.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.lock().peek().map(|Reverse(entry)| entry.wake_at)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fire due wake-ups through `on_wake` until `shutdown` is cancelled.
    pub async fn run<F>(&self, shutdown: CancellationToken, mut on_wake: F)
    where
        F: FnMut(String),
    {
        tracing::debug!("timer loop started");
        loop {
            for instance_id in self.pop_due(Utc::now()) {
                tracing::debug!(instance_id = %instance_id, "timer fired");
                on_wake(instance_id);
            }

            let wait = self
                .next_deadline()
                .map(|deadline| {
                    (deadline - Utc::now())
                        .to_std()
                        .unwrap_or(Duration::ZERO)
                        .min(MAX_IDLE_WAIT)
                })
                .unwrap_or(MAX_IDLE_WAIT);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
        tracing::debug!(pending = self.len(), "timer loop stopped");
    }
}
