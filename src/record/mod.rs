pub mod identity;
pub mod store;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

pub use identity::{IdGenerator, UuidV4};
pub use store::RecordStore;

// ── Kinds ──────────────────────────────────────────────────────────

/// Which of the three record tables a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Feeding,
    Sleep,
    Diaper,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [RecordKind::Feeding, RecordKind::Sleep, RecordKind::Diaper];

    /// Remote table name for this kind.
    pub fn table(&self) -> &'static str {
        match self {
            RecordKind::Feeding => "feedings",
            RecordKind::Sleep => "sleeps",
            RecordKind::Diaper => "diapers",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Feeding => "feeding",
            RecordKind::Sleep => "sleep",
            RecordKind::Diaper => "diaper",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "feeding" | "feedings" => Ok(RecordKind::Feeding),
            "sleep" | "sleeps" => Ok(RecordKind::Sleep),
            "diaper" | "diapers" => Ok(RecordKind::Diaper),
            other => Err(Error::InvalidRecord(format!(
                "unknown record kind '{other}' (expected feeding, sleep or diaper)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedingType {
    BreastLeft,
    BreastRight,
    Pumped,
    Formula,
}

impl FromStr for FeedingType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "breast_left" => Ok(FeedingType::BreastLeft),
            "breast_right" => Ok(FeedingType::BreastRight),
            "pumped" => Ok(FeedingType::Pumped),
            "formula" => Ok(FeedingType::Formula),
            other => Err(Error::InvalidRecord(format!("unknown feeding type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepType {
    Nap,
    Night,
}

impl FromStr for SleepType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "nap" => Ok(SleepType::Nap),
            "night" => Ok(SleepType::Night),
            other => Err(Error::InvalidRecord(format!("unknown sleep type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiaperType {
    Wet,
    Dirty,
    Both,
}

impl FromStr for DiaperType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "wet" => Ok(DiaperType::Wet),
            "dirty" => Ok(DiaperType::Dirty),
            "both" => Ok(DiaperType::Both),
            other => Err(Error::InvalidRecord(format!("unknown diaper type '{other}'"))),
        }
    }
}

// ── Details ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedingDetails {
    pub feeding_type: FeedingType,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: Option<u64>,
    #[serde(default)]
    pub amount_ml: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepDetails {
    pub sleep_type: SleepType,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiaperDetails {
    pub diaper_type: DiaperType,
    pub occurred_at: DateTime<Utc>,
}

/// Kind-specific columns. Untagged so a record serializes to the flat row
/// shape the remote tables use; the `*_type` column tells the variants apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordDetails {
    Feeding(FeedingDetails),
    Sleep(SleepDetails),
    Diaper(DiaperDetails),
}

impl RecordDetails {
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordDetails::Feeding(_) => RecordKind::Feeding,
            RecordDetails::Sleep(_) => RecordKind::Sleep,
            RecordDetails::Diaper(_) => RecordKind::Diaper,
        }
    }

    /// The instant the event started (or occurred, for diapers).
    pub fn started_at(&self) -> DateTime<Utc> {
        match self {
            RecordDetails::Feeding(d) => d.started_at,
            RecordDetails::Sleep(d) => d.started_at,
            RecordDetails::Diaper(d) => d.occurred_at,
        }
    }

    fn span(&self) -> Option<(DateTime<Utc>, Option<DateTime<Utc>>, Option<u64>)> {
        match self {
            RecordDetails::Feeding(d) => Some((d.started_at, d.ended_at, d.duration_seconds)),
            RecordDetails::Sleep(d) => Some((d.started_at, d.ended_at, d.duration_seconds)),
            RecordDetails::Diaper(_) => None,
        }
    }

    fn set_duration(&mut self, seconds: u64) {
        match self {
            RecordDetails::Feeding(d) => d.duration_seconds = Some(seconds),
            RecordDetails::Sleep(d) => d.duration_seconds = Some(seconds),
            RecordDetails::Diaper(_) => {}
        }
    }
}

// ── Records ────────────────────────────────────────────────────────

/// A logged caregiving event, keyed by its client-generated id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    pub baby_id: String,
    pub recorded_by: String,
    #[serde(flatten)]
    pub details: RecordDetails,
    #[serde(default)]
    pub memo_tags: Option<Vec<String>>,
    #[serde(default)]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        self.details.kind()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.details.started_at()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let when = self.started_at().format("%Y-%m-%d %H:%M");
        match &self.details {
            RecordDetails::Feeding(d) => {
                write!(f, "{when} feeding ({:?})", d.feeding_type)?;
                if let Some(ml) = d.amount_ml {
                    write!(f, " {ml} ml")?;
                }
                if let Some(secs) = d.duration_seconds {
                    write!(f, " {}m{:02}s", secs / 60, secs % 60)?;
                }
            }
            RecordDetails::Sleep(d) => {
                write!(f, "{when} sleep ({:?})", d.sleep_type)?;
                if let Some(secs) = d.duration_seconds {
                    write!(f, " {}m{:02}s", secs / 60, secs % 60)?;
                }
            }
            RecordDetails::Diaper(d) => {
                write!(f, "{when} diaper ({:?})", d.diaper_type)?;
            }
        }
        write!(f, " [{}]", self.id)
    }
}

/// Writer input: a record that may still be missing its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDraft {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub baby_id: String,
    pub recorded_by: String,
    #[serde(flatten)]
    pub details: RecordDetails,
    #[serde(default)]
    pub memo_tags: Option<Vec<String>>,
    #[serde(default)]
    pub note: Option<String>,
}

impl RecordDraft {
    pub fn new(
        baby_id: impl Into<String>,
        recorded_by: impl Into<String>,
        details: RecordDetails,
    ) -> Self {
        Self {
            id: None,
            baby_id: baby_id.into(),
            recorded_by: recorded_by.into(),
            details,
            memo_tags: None,
            note: None,
        }
    }

    pub fn feeding(
        baby_id: impl Into<String>,
        recorded_by: impl Into<String>,
        feeding_type: FeedingType,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            baby_id,
            recorded_by,
            RecordDetails::Feeding(FeedingDetails {
                feeding_type,
                started_at,
                ended_at: None,
                duration_seconds: None,
                amount_ml: None,
            }),
        )
    }

    pub fn sleep(
        baby_id: impl Into<String>,
        recorded_by: impl Into<String>,
        sleep_type: SleepType,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            baby_id,
            recorded_by,
            RecordDetails::Sleep(SleepDetails {
                sleep_type,
                started_at,
                ended_at: None,
                duration_seconds: None,
            }),
        )
    }

    pub fn diaper(
        baby_id: impl Into<String>,
        recorded_by: impl Into<String>,
        diaper_type: DiaperType,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            baby_id,
            recorded_by,
            RecordDetails::Diaper(DiaperDetails {
                diaper_type,
                occurred_at,
            }),
        )
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the amount for feedings; ignored for other kinds.
    pub fn with_amount_ml(mut self, amount_ml: u32) -> Self {
        if let RecordDetails::Feeding(d) = &mut self.details {
            d.amount_ml = Some(amount_ml);
        }
        self
    }

    /// Sets the end instant for feedings and sleeps; ignored for diapers.
    pub fn with_ended_at(mut self, ended_at: DateTime<Utc>) -> Self {
        match &mut self.details {
            RecordDetails::Feeding(d) => d.ended_at = Some(ended_at),
            RecordDetails::Sleep(d) => d.ended_at = Some(ended_at),
            RecordDetails::Diaper(_) => {}
        }
        self
    }

    pub fn with_duration_seconds(mut self, seconds: u64) -> Self {
        self.details.set_duration(seconds);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.memo_tags = if tags.is_empty() { None } else { Some(tags) };
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn kind(&self) -> RecordKind {
        self.details.kind()
    }

    pub fn validate(&self) -> Result<()> {
        if self.baby_id.trim().is_empty() {
            return Err(Error::InvalidRecord("baby_id is required".into()));
        }
        if self.recorded_by.trim().is_empty() {
            return Err(Error::InvalidRecord("recorded_by is required".into()));
        }
        if let Some((started_at, Some(ended_at), _)) = self.details.span() {
            if ended_at < started_at {
                return Err(Error::InvalidRecord(format!(
                    "ended_at {ended_at} is before started_at {started_at}"
                )));
            }
        }
        Ok(())
    }

    /// Turn the draft into a record with the given identity. A missing
    /// duration is derived from the start and end instants when both exist.
    pub fn finalize(self, id: Uuid, created_at: DateTime<Utc>) -> Result<Record> {
        self.validate()?;
        let mut details = self.details;
        if let Some((started_at, Some(ended_at), None)) = details.span() {
            let seconds = (ended_at - started_at).num_seconds().max(0) as u64;
            details.set_duration(seconds);
        }
        Ok(Record {
            id,
            baby_id: self.baby_id,
            recorded_by: self.recorded_by,
            details,
            memo_tags: self.memo_tags,
            note: self.note,
            created_at,
        })
    }
}
