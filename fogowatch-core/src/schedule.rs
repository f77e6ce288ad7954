//! Polling schedule
//!
//! Cycles never overlap. In continuous mode a failed cycle is logged and the
//! loop carries on; the wait between cycles wakes up as soon as shutdown is
//! requested. Shutdown is only observed between cycles, so a cycle in flight
//! always completes and persists.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::Result;

/// Cooperative shutdown flag with a wake-up channel.
///
/// Clones share the same flag. Triggering is idempotent.
#[derive(Clone)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    wake_tx: Sender<()>,
    wake_rx: Arc<Mutex<Receiver<()>>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = mpsc::channel();
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            wake_tx,
            wake_rx: Arc::new(Mutex::new(wake_rx)),
        }
    }

    pub fn trigger(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            let _ = self.wake_tx.send(());
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep up to `timeout`. Returns `true` if shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        let Ok(rx) = self.wake_rx.lock() else {
            std::thread::sleep(timeout);
            return self.is_triggered();
        };
        if let Err(RecvTimeoutError::Disconnected) = rx.recv_timeout(timeout) {
            tracing::debug!("Shutdown channel closed");
        }
        self.is_triggered()
    }
}

/// How the scheduler ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub cycles: u64,
    pub failed: u64,
}

/// Drives cycles at a fixed interval.
pub struct Scheduler {
    poll_seconds: i64,
    shutdown: Shutdown,
}

impl Scheduler {
    /// `poll_seconds <= 0` runs a single cycle.
    pub fn new(poll_seconds: i64, shutdown: Shutdown) -> Self {
        Self {
            poll_seconds,
            shutdown,
        }
    }

    pub fn is_single_shot(&self) -> bool {
        self.poll_seconds <= 0
    }

    pub fn interval(&self) -> Option<Duration> {
        (!self.is_single_shot()).then(|| Duration::from_secs(self.poll_seconds as u64))
    }

    /// Run `cycle` until shutdown, or once in single-shot mode.
    ///
    /// A single-shot cycle's error is returned to the caller. In continuous
    /// mode errors are logged and counted.
    pub fn run<T, C>(&self, mut cycle: C) -> Result<ScheduleSummary>
    where
        C: FnMut() -> Result<T>,
    {
        let mut summary = ScheduleSummary::default();

        let Some(interval) = self.interval() else {
            summary.cycles = 1;
            cycle()?;
            return Ok(summary);
        };

        tracing::info!(poll_seconds = self.poll_seconds, "Continuous mode started");

        while !self.shutdown.is_triggered() {
            summary.cycles += 1;
            if let Err(e) = cycle() {
                summary.failed += 1;
                tracing::error!(cycle = summary.cycles, error = %e, "Cycle failed");
            }

            if self.shutdown.wait_timeout(interval) {
                break;
            }
        }

        tracing::info!(
            cycles = summary.cycles,
            failed = summary.failed,
            "Continuous mode stopped"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::time::Instant;

    #[test]
    fn test_single_shot_returns_cycle_error() {
        let scheduler = Scheduler::new(0, Shutdown::new());
        assert!(scheduler.is_single_shot());

        let result = scheduler.run(|| -> Result<()> { Err(Error::Feed("down".to_string())) });
        assert!(matches!(result, Err(Error::Feed(_))));

        let ok = Scheduler::new(-5, Shutdown::new()).run(|| Ok(())).unwrap();
        assert_eq!(ok.cycles, 1);
    }

    #[test]
    fn test_continuous_mode_survives_failures_until_shutdown() {
        let shutdown = Shutdown::new();
        let scheduler = Scheduler::new(1, shutdown.clone());
        let mut calls = 0;

        let summary = scheduler
            .run(|| {
                calls += 1;
                if calls == 2 {
                    shutdown.trigger();
                }
                if calls == 1 {
                    Err(Error::Feed("timeout".to_string()))
                } else {
                    Ok(())
                }
            })
            .unwrap();

        assert_eq!(summary.cycles, 2);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_wait_is_interrupted_by_trigger() {
        let shutdown = Shutdown::new();
        let remote = shutdown.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            remote.trigger();
        });

        let started = Instant::now();
        assert!(shutdown.wait_timeout(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(10));
        handle.join().unwrap();

        assert!(shutdown.wait_timeout(Duration::from_secs(30)));
    }

    #[test]
    fn test_wait_times_out_without_trigger() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.wait_timeout(Duration::from_millis(10)));
    }
}
