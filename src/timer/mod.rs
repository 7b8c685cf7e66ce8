//! Stopwatch for timed records (feedings and sleeps).
//!
//! Elapsed time is always derived from a wall-clock anchor rather than by
//! counting ticks, so it stays correct while the process is suspended and
//! can be recovered from a persisted snapshot.

pub mod active;
pub mod clock;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{Error, Result};

pub use active::{ActiveTimer, StoppedTimer, TimerKind, TimerSnapshot, TimerStatus};
pub use clock::{Clock, SystemClock};

#[cfg(test)]
pub(crate) use clock::ManualClock;

/// How often a running timer republishes its elapsed value.
pub const TICK_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerState {
    Idle,
    Running,
    Paused,
}

/// Persistable stopwatch state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Stopwatch {
    Idle,
    /// Counting; elapsed is `now - anchor`.
    Running { anchor: DateTime<Utc> },
    /// Frozen at `elapsed_seconds`.
    Paused { elapsed_seconds: u64 },
}

impl Stopwatch {
    fn state(&self) -> TimerState {
        match self {
            Stopwatch::Idle => TimerState::Idle,
            Stopwatch::Running { .. } => TimerState::Running,
            Stopwatch::Paused { .. } => TimerState::Paused,
        }
    }

    fn elapsed_at(&self, now: DateTime<Utc>) -> u64 {
        match *self {
            Stopwatch::Idle => 0,
            Stopwatch::Running { anchor } => seconds_between(anchor, now),
            Stopwatch::Paused { elapsed_seconds } => elapsed_seconds,
        }
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    ((to - from).num_milliseconds().max(0) / 1000) as u64
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Start/pause/resume/stop stopwatch publishing whole elapsed seconds.
///
/// While running, a background task (spawned only when a tokio runtime is
/// available) recomputes the value every [`TICK_INTERVAL`] and publishes it
/// to [`subscribe`](Self::subscribe) receivers. [`refresh`](Self::refresh)
/// does the same on demand, e.g. when the app returns to the foreground.
pub struct ElapsedTimer {
    clock: Arc<dyn Clock>,
    stopwatch: Arc<Mutex<Stopwatch>>,
    tx: Arc<watch::Sender<u64>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl ElapsedTimer {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            clock,
            stopwatch: Arc::new(Mutex::new(Stopwatch::Idle)),
            tx: Arc::new(tx),
            ticker: Mutex::new(None),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn state(&self) -> TimerState {
        lock(&self.stopwatch).state()
    }

    pub fn snapshot(&self) -> Stopwatch {
        *lock(&self.stopwatch)
    }

    /// Current elapsed seconds, computed from the clock.
    pub fn elapsed(&self) -> u64 {
        let now = self.clock.now();
        lock(&self.stopwatch).elapsed_at(now)
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    pub fn start(&self) -> Result<()> {
        {
            let mut sw = lock(&self.stopwatch);
            if *sw != Stopwatch::Idle {
                return Err(Error::Timer("timer already started".into()));
            }
            *sw = Stopwatch::Running {
                anchor: self.clock.now(),
            };
        }
        self.tx.send_replace(0);
        self.spawn_ticker();
        Ok(())
    }

    /// Freeze the elapsed value. Only valid while running.
    pub fn pause(&self) -> Result<u64> {
        let frozen = {
            let mut sw = lock(&self.stopwatch);
            let Stopwatch::Running { anchor } = *sw else {
                return Err(Error::Timer("timer is not running".into()));
            };
            let frozen = seconds_between(anchor, self.clock.now());
            *sw = Stopwatch::Paused {
                elapsed_seconds: frozen,
            };
            frozen
        };
        self.stop_ticker();
        self.tx.send_replace(frozen);
        Ok(frozen)
    }

    /// Continue counting from the frozen value. Only valid while paused.
    pub fn resume(&self) -> Result<()> {
        {
            let mut sw = lock(&self.stopwatch);
            let Stopwatch::Paused { elapsed_seconds } = *sw else {
                return Err(Error::Timer("timer is not paused".into()));
            };
            let anchor = self.clock.now() - chrono::Duration::seconds(elapsed_seconds as i64);
            *sw = Stopwatch::Running { anchor };
        }
        self.spawn_ticker();
        Ok(())
    }

    /// Return the final elapsed seconds and go back to idle.
    pub fn stop(&self) -> u64 {
        let now = self.clock.now();
        let last = {
            let mut sw = lock(&self.stopwatch);
            let last = sw.elapsed_at(now);
            *sw = Stopwatch::Idle;
            last
        };
        self.stop_ticker();
        self.tx.send_replace(0);
        last
    }

    pub fn reset(&self) {
        *lock(&self.stopwatch) = Stopwatch::Idle;
        self.stop_ticker();
        self.tx.send_replace(0);
    }

    /// Recompute and publish the elapsed value now.
    pub fn refresh(&self) -> u64 {
        let value = self.elapsed();
        self.tx.send_replace(value);
        value
    }

    /// Adopt a previously persisted state; a running stopwatch keeps counting
    /// from its original anchor.
    pub fn restore(&self, stopwatch: Stopwatch) {
        *lock(&self.stopwatch) = stopwatch;
        self.refresh();
        match stopwatch {
            Stopwatch::Running { .. } => self.spawn_ticker(),
            _ => self.stop_ticker(),
        }
    }

    fn spawn_ticker(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::debug!("No tokio runtime; timer ticks only on refresh");
            return;
        };

        let clock = Arc::clone(&self.clock);
        let stopwatch = Arc::clone(&self.stopwatch);
        let tx = Arc::clone(&self.tx);
        let task = handle.spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let sw = *lock(&stopwatch);
                match sw {
                    Stopwatch::Running { anchor } => {
                        tx.send_replace(seconds_between(anchor, clock.now()));
                    }
                    _ => break,
                }
            }
        });

        if let Some(old) = lock(&self.ticker).replace(task) {
            old.abort();
        }
    }

    fn stop_ticker(&self) {
        if let Some(task) = lock(&self.ticker).take() {
            task.abort();
        }
    }
}

impl Default for ElapsedTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ElapsedTimer {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}
