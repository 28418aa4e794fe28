//! Delayed Delivery Timers
//!
//! A timer lives in the active set from creation until it either fires or is
//! cancelled. Both paths start by removing the entry from the set, so exactly
//! one of them wins.

use crate::error::{Result, RuntimeError};
use dashmap::DashMap;
use otp_types::{CancelResult, TimerRef};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

struct TimerEntry {
    created_at: Instant,
    delay: Duration,
    task: Option<JoinHandle<()>>,
}

impl TimerEntry {
    /// Nominal delay minus time elapsed since creation, clamped at zero
    fn remaining(&self) -> Duration {
        self.delay.saturating_sub(self.created_at.elapsed())
    }
}

/// Active timer set
#[derive(Default)]
pub struct TimerSet {
    active: Arc<DashMap<TimerRef, TimerEntry>>,
}

impl std::fmt::Debug for TimerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerSet")
            .field("active", &self.active.len())
            .finish()
    }
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` after `delay` unless cancelled first
    pub fn schedule<F>(&self, delay: Duration, action: F) -> Result<TimerRef>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = Handle::try_current().map_err(|e| RuntimeError::unavailable(e.to_string()))?;
        let reference = TimerRef::next();

        self.active.insert(
            reference,
            TimerEntry {
                created_at: Instant::now(),
                delay,
                task: None,
            },
        );

        let active = Arc::clone(&self.active);
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if active.remove(&reference).is_some() {
                trace!(timer = %reference, "Timer fired");
                action();
            }
        });

        if let Some(mut entry) = self.active.get_mut(&reference) {
            entry.task = Some(task);
        }
        Ok(reference)
    }

    /// Cancel a pending timer, reporting how much of its delay was left
    pub fn cancel(&self, reference: TimerRef) -> CancelResult {
        match self.active.remove(&reference) {
            Some((_, entry)) => {
                if let Some(task) = &entry.task {
                    task.abort();
                }
                let time_remaining = entry.remaining();
                trace!(timer = %reference, ?time_remaining, "Timer cancelled");
                CancelResult::Cancelled { time_remaining }
            }
            None => CancelResult::TimerNotFound,
        }
    }

    /// Remaining time of a pending timer, without cancelling it
    pub fn read(&self, reference: TimerRef) -> Option<Duration> {
        self.active.get(&reference).map(|entry| entry.remaining())
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Cancel every pending timer
    pub fn cancel_all(&self) -> usize {
        let references: Vec<TimerRef> = self.active.iter().map(|entry| *entry.key()).collect();
        references
            .into_iter()
            .filter(|reference| self.cancel(*reference).is_cancelled())
            .count()
    }
}
