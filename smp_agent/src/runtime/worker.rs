//! Per-queue worker restart policy (spec.md §4.6): a sliding one-minute
//! window of restart timestamps bounds how often a worker may be
//! respawned before the agent gives up and emits a critical event.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::{error, warn};

pub struct RestartWindow {
    window: Duration,
    max_restarts: u32,
    timestamps: VecDeque<Instant>,
}

impl RestartWindow {
    pub fn new(max_restarts_per_minute: u32) -> Self {
        Self { window: Duration::from_secs(60), max_restarts: max_restarts_per_minute, timestamps: VecDeque::new() }
    }

    fn evict_stale(&mut self, now: Instant) {
        while let Some(front) = self.timestamps.front() {
            if now.duration_since(*front) > self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Records a restart attempt at `now`. Returns `Ok(())` if the worker
    /// may restart, `Err(())` if the window is exhausted and the worker
    /// should retire with a `CRITICAL` event instead.
    pub fn record(&mut self, now: Instant) -> Result<(), ()> {
        self.evict_stale(now);
        if self.timestamps.len() as u32 >= self.max_restarts {
            error!(max = self.max_restarts, "worker exceeded restart budget, retiring");
            return Err(());
        }
        self.timestamps.push_back(now);
        warn!(count = self.timestamps.len(), "worker restarting");
        Ok(())
    }
}

/// One worker's restart bookkeeping (spec.md §4.6 `{id, action, restart_count}`).
pub struct WorkerHandle {
    pub id: u64,
    restarts: RestartWindow,
    pub restart_count: u64,
}

impl WorkerHandle {
    pub fn new(id: u64, max_restarts_per_minute: u32) -> Self {
        Self { id, restarts: RestartWindow::new(max_restarts_per_minute), restart_count: 0 }
    }

    pub fn try_restart(&mut self, now: Instant) -> Result<(), ()> {
        self.restarts.record(now)?;
        self.restart_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_restarts_under_budget() {
        let mut w = RestartWindow::new(3);
        let t0 = Instant::now();
        assert!(w.record(t0).is_ok());
        assert!(w.record(t0).is_ok());
        assert!(w.record(t0).is_ok());
        assert!(w.record(t0).is_err());
    }

    #[test]
    fn stale_restarts_age_out_of_window() {
        let mut w = RestartWindow::new(1);
        let t0 = Instant::now();
        assert!(w.record(t0).is_ok());
        let t1 = t0 + Duration::from_secs(61);
        assert!(w.record(t1).is_ok());
    }
}
