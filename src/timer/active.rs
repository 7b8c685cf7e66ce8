use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use super::{Clock, ElapsedTimer, Stopwatch, TimerState};
use crate::error::{Error, Result};
use crate::record::{FeedingType, RecordDraft, RecordKind, SleepType};
use crate::storage::KeyValueStore;

/// Storage key for the persisted timer session.
pub const ACTIVE_TIMER_KEY: &str = "active_timer";

/// What is being timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TimerKind {
    Feeding { feeding_type: FeedingType },
    Sleep { sleep_type: SleepType },
}

impl TimerKind {
    pub fn record_kind(&self) -> RecordKind {
        match self {
            TimerKind::Feeding { .. } => RecordKind::Feeding,
            TimerKind::Sleep { .. } => RecordKind::Sleep,
        }
    }
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerKind::Feeding { feeding_type } => write!(f, "feeding ({feeding_type:?})"),
            TimerKind::Sleep { sleep_type } => write!(f, "sleep ({sleep_type:?})"),
        }
    }
}

/// Everything needed to recover a timer after the process dies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    pub kind: TimerKind,
    pub started_at: DateTime<Utc>,
    pub stopwatch: Stopwatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimerStatus {
    pub kind: TimerKind,
    pub started_at: DateTime<Utc>,
    pub state: TimerState,
    pub elapsed_seconds: u64,
}

/// Result of stopping a timer; becomes a feeding or sleep draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoppedTimer {
    pub kind: TimerKind,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Counted time, excluding pauses.
    pub duration_seconds: u64,
}

impl StoppedTimer {
    pub fn into_draft(
        self,
        baby_id: impl Into<String>,
        recorded_by: impl Into<String>,
    ) -> RecordDraft {
        let draft = match self.kind {
            TimerKind::Feeding { feeding_type } => {
                RecordDraft::feeding(baby_id, recorded_by, feeding_type, self.started_at)
            }
            TimerKind::Sleep { sleep_type } => {
                RecordDraft::sleep(baby_id, recorded_by, sleep_type, self.started_at)
            }
        };
        draft
            .with_ended_at(self.ended_at)
            .with_duration_seconds(self.duration_seconds)
    }
}

#[derive(Debug, Clone, Copy)]
struct Session {
    kind: TimerKind,
    started_at: DateTime<Utc>,
}

/// The single feeding/sleep timer of a logging context, persisted on every
/// transition so it survives a process restart.
pub struct ActiveTimer {
    store: Arc<dyn KeyValueStore>,
    timer: ElapsedTimer,
    session: Mutex<Option<Session>>,
}

impl ActiveTimer {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            timer: ElapsedTimer::with_clock(clock),
            session: Mutex::new(None),
        }
    }

    fn status_of(&self, session: &Session) -> TimerStatus {
        TimerStatus {
            kind: session.kind,
            started_at: session.started_at,
            state: self.timer.state(),
            elapsed_seconds: self.timer.elapsed(),
        }
    }

    async fn persist(&self, session: &Session) {
        let snapshot = TimerSnapshot {
            kind: session.kind,
            started_at: session.started_at,
            stopwatch: self.timer.snapshot(),
        };
        let raw = match serde_json::to_string(&snapshot) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("Failed to serialize timer: {e}");
                return;
            }
        };
        if let Err(e) = self.store.set(ACTIVE_TIMER_KEY, &raw).await {
            log::warn!("Failed to persist timer: {e}");
        }
    }

    async fn clear(&self) {
        if let Err(e) = self.store.delete(ACTIVE_TIMER_KEY).await {
            log::warn!("Failed to clear persisted timer: {e}");
        }
    }

    /// Reload a persisted session, if any.
    pub async fn restore(&self) -> Option<TimerStatus> {
        let raw = match self.store.get_string(ACTIVE_TIMER_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("Failed to load persisted timer: {e}");
                return None;
            }
        };
        let snapshot: TimerSnapshot = match serde_json::from_str(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!("Discarding unreadable timer snapshot: {e}");
                self.clear().await;
                return None;
            }
        };
        if snapshot.stopwatch == Stopwatch::Idle {
            self.clear().await;
            return None;
        }

        let session = Session {
            kind: snapshot.kind,
            started_at: snapshot.started_at,
        };
        let mut guard = self.session.lock().await;
        self.timer.restore(snapshot.stopwatch);
        *guard = Some(session);
        log::info!("Restored {} timer started at {}", session.kind, session.started_at);
        Some(self.status_of(&session))
    }

    pub async fn start(&self, kind: TimerKind) -> Result<TimerStatus> {
        let mut guard = self.session.lock().await;
        if let Some(current) = guard.as_ref() {
            return Err(Error::Timer(format!(
                "a {} timer is already active",
                current.kind
            )));
        }
        self.timer.start()?;
        let session = Session {
            kind,
            started_at: self.timer.now(),
        };
        *guard = Some(session);
        self.persist(&session).await;
        Ok(self.status_of(&session))
    }

    pub async fn pause(&self) -> Result<TimerStatus> {
        let guard = self.session.lock().await;
        let session = (*guard).ok_or_else(|| Error::Timer("no active timer".into()))?;
        self.timer.pause()?;
        self.persist(&session).await;
        Ok(self.status_of(&session))
    }

    pub async fn resume(&self) -> Result<TimerStatus> {
        let guard = self.session.lock().await;
        let session = (*guard).ok_or_else(|| Error::Timer("no active timer".into()))?;
        self.timer.resume()?;
        self.persist(&session).await;
        Ok(self.status_of(&session))
    }

    /// Stop the active timer, if any, and forget it.
    pub async fn stop(&self) -> Option<StoppedTimer> {
        let mut guard = self.session.lock().await;
        let session = guard.take()?;
        let duration_seconds = self.timer.stop();
        self.clear().await;
        Some(StoppedTimer {
            kind: session.kind,
            started_at: session.started_at,
            ended_at: self.timer.now(),
            duration_seconds,
        })
    }

    pub async fn reset(&self) {
        let mut guard = self.session.lock().await;
        *guard = None;
        self.timer.reset();
        self.clear().await;
    }

    pub async fn status(&self) -> Option<TimerStatus> {
        let guard = self.session.lock().await;
        guard.as_ref().map(|s| self.status_of(s))
    }

    pub fn refresh(&self) -> u64 {
        self.timer.refresh()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.timer.subscribe()
    }
}
