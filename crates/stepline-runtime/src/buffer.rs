//! Time-based coalescing of streamed deltas
//!
//! A buffer arms a flush deadline when the first delta arrives and disarms it
//! when its contents are taken. The streaming loop races the next delta
//! against the earliest armed deadline, so a burst of deltas becomes one
//! published chunk per interval.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct CoalescingBuffer {
    pending: String,
    deadline: Option<Instant>,
    interval: Duration,
}

impl CoalescingBuffer {
    pub fn new(interval: Duration) -> Self {
        Self {
            pending: String::new(),
            deadline: None,
            interval,
        }
    }

    /// Append a delta, arming the flush deadline if it is not armed yet
    pub fn push(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        self.pending.push_str(delta);
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.interval);
        }
    }

    /// Drain the buffer and cancel its deadline; `None` if nothing is pending
    pub fn take(&mut self) -> Option<String> {
        self.deadline = None;
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| d <= now)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Earliest of several optional deadlines
pub fn earliest(deadlines: &[Option<Instant>]) -> Option<Instant> {
    deadlines.iter().flatten().min().copied()
}

/// Sleep until `deadline`, or forever when none is armed
pub async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}
