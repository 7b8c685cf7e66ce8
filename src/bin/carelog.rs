use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, TimeZone, Utc};
use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

use carelog::config::{self, Settings};
use carelog::{
    CareLog, DiaperType, Error, FeedingType, RecordDraft, RecordKind, SleepType, SyncReport,
    TimerKind, TimerStatus,
};

#[derive(Parser)]
#[command(name = "carelog", about = "Offline-first baby care log")]
struct Cli {
    /// Database path (default: ~/.carelog/carelog.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Progress reporter that writes to stderr.
struct StderrProgress;

impl carelog::SyncProgress for StderrProgress {
    fn on_pass_start(&self, total: usize) {
        eprintln!("Syncing {total} pending records...");
    }

    fn on_entry_start(&self, id: Uuid, index: usize, total: usize) {
        eprint!("\r  [{}/{}] {}   ", index + 1, total, id);
    }

    fn on_entry_failed(&self, id: Uuid, error: &carelog::BackendError) {
        eprintln!("\n  {id} still pending: {error}");
    }

    fn on_entry_dead_lettered(&self, id: Uuid, error: &carelog::BackendError) {
        eprintln!("\n  {id} rejected: {error}");
    }

    fn on_pass_complete(&self, report: &SyncReport) {
        eprintln!("\n  Done: {} records synced", report.items_synced);
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Log a feeding, sleep or diaper change
    Log {
        #[command(subcommand)]
        entry: LogEntry,
    },
    /// Deliver queued records to the backend
    Sync,
    /// Inspect records waiting for delivery
    Pending {
        #[command(subcommand)]
        action: PendingAction,
    },
    /// Time a feeding or sleep
    Timer {
        #[command(subcommand)]
        action: TimerAction,
    },
    /// Delete a record from the backend and the local queue
    Delete {
        /// Record kind: feeding, sleep or diaper
        kind: RecordKind,
        /// Record id
        id: Uuid,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show queue, timer and backend status
    Status,
}

#[derive(Args)]
struct Common {
    /// Baby id (default: config baby_id)
    #[arg(long)]
    baby: Option<String>,
    /// Author (default: config recorded_by)
    #[arg(long)]
    by: Option<String>,
    /// Record id to reuse, e.g. when re-logging a record
    #[arg(long)]
    id: Option<Uuid>,
    /// Memo tag (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,
    /// Free-form note
    #[arg(long)]
    note: Option<String>,
}

#[derive(Subcommand)]
enum LogEntry {
    /// Log a feeding
    Feeding {
        /// breast-left, breast-right, pumped or formula
        #[arg(long = "type")]
        feeding_type: FeedingType,
        /// Start time: RFC 3339, "YYYY-MM-DD HH:MM" or "HH:MM" today (default: now)
        #[arg(long)]
        at: Option<String>,
        /// End time, same formats as --at
        #[arg(long)]
        until: Option<String>,
        /// Amount in ml
        #[arg(long)]
        amount_ml: Option<u32>,
        #[command(flatten)]
        common: Common,
    },
    /// Log a sleep
    Sleep {
        /// nap or night
        #[arg(long = "type")]
        sleep_type: SleepType,
        #[arg(long)]
        at: Option<String>,
        #[arg(long)]
        until: Option<String>,
        #[command(flatten)]
        common: Common,
    },
    /// Log a diaper change
    Diaper {
        /// wet, dirty or both
        #[arg(long = "type")]
        diaper_type: DiaperType,
        #[arg(long)]
        at: Option<String>,
        #[command(flatten)]
        common: Common,
    },
}

#[derive(Subcommand)]
enum PendingAction {
    /// List records waiting for delivery
    List,
    /// List records the backend rejected
    Dead,
    /// Move rejected records back to the queue (all if no ids given)
    Requeue { ids: Vec<Uuid> },
}

#[derive(Subcommand)]
enum TimerAction {
    /// Start timing a feeding or sleep
    Start {
        #[command(subcommand)]
        target: TimerTarget,
    },
    /// Pause the running timer
    Pause,
    /// Resume the paused timer
    Resume,
    /// Show the active timer
    Status,
    /// Stop the timer and log the record
    Stop {
        /// Discard instead of logging a record
        #[arg(long)]
        discard: bool,
        #[command(flatten)]
        common: Common,
    },
    /// Discard the active timer
    Reset,
}

#[derive(Subcommand)]
enum TimerTarget {
    Feeding {
        #[arg(long = "type")]
        feeding_type: FeedingType,
    },
    Sleep {
        #[arg(long = "type")]
        sleep_type: SleepType,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => carelog::Database::open_at(path).await?,
        None => carelog::Database::open().await?,
    };

    match cli.command {
        Commands::Log { entry } => {
            let (care, settings) = open_care(&db).await?;
            let draft = build_draft(entry, &settings)?;
            save(&care, draft).await?;
        }
        Commands::Sync => {
            let (care, settings) = open_care(&db).await?;
            let report = care.sync_pending(&settings.sync, &StderrProgress).await;
            print_sync_report(&report);
        }
        Commands::Pending { action } => {
            let (care, _) = open_care(&db).await?;
            handle_pending(&care, action).await?;
        }
        Commands::Timer { action } => {
            let (care, settings) = open_care(&db).await?;
            handle_timer(&care, &settings, action).await?;
        }
        Commands::Delete { kind, id } => {
            let (care, _) = open_care(&db).await?;
            care.delete_record(kind, id).await?;
            println!("Deleted {kind} {id}");
        }
        Commands::Status => {
            let (care, _) = open_care(&db).await?;
            print_status(&db, &care).await?;
        }
        // Works without a usable backend setting.
        Commands::Config { action } => {
            handle_config(&db, action).await?;
        }
    }

    Ok(())
}

/// Open the logging context over `db` and load its persisted state.
async fn open_care(db: &carelog::Database) -> anyhow::Result<(CareLog, Settings)> {
    let settings = Settings::load(db).await?;
    let care = CareLog::open(db.clone()).await?;
    care.load().await;
    Ok((care, settings))
}

/// Parse a user-supplied time: RFC 3339, local "YYYY-MM-DD HH:MM" or local
/// "HH:MM" today.
fn parse_when(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M") {
        naive
    } else if let Ok(time) = NaiveTime::parse_from_str(raw, "%H:%M") {
        Local::now().date_naive().and_time(time)
    } else {
        anyhow::bail!("Cannot parse time '{raw}'. Use RFC 3339, 'YYYY-MM-DD HH:MM' or 'HH:MM'.");
    };
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| anyhow::anyhow!("'{raw}' does not exist in the local time zone"))
}

fn parse_when_or_now(raw: Option<&str>) -> anyhow::Result<DateTime<Utc>> {
    raw.map(parse_when).unwrap_or_else(|| Ok(Utc::now()))
}

fn subject(common: &Common, settings: &Settings) -> anyhow::Result<(String, String)> {
    let baby = common
        .baby
        .clone()
        .or_else(|| settings.baby_id.clone())
        .ok_or_else(|| {
            anyhow::anyhow!("No baby id. Pass --baby or run: carelog config set baby_id <id>")
        })?;
    let by = common
        .by
        .clone()
        .or_else(|| settings.recorded_by.clone())
        .ok_or_else(|| {
            anyhow::anyhow!("No author. Pass --by or run: carelog config set recorded_by <name>")
        })?;
    Ok((baby, by))
}

fn apply_common(mut draft: RecordDraft, common: Common) -> RecordDraft {
    if let Some(id) = common.id {
        draft = draft.with_id(id);
    }
    if let Some(note) = common.note {
        draft = draft.with_note(note);
    }
    draft.with_tags(common.tags)
}

fn build_draft(entry: LogEntry, settings: &Settings) -> anyhow::Result<RecordDraft> {
    let draft = match entry {
        LogEntry::Feeding {
            feeding_type,
            at,
            until,
            amount_ml,
            common,
        } => {
            let (baby, by) = subject(&common, settings)?;
            let mut draft =
                RecordDraft::feeding(baby, by, feeding_type, parse_when_or_now(at.as_deref())?);
            if let Some(until) = until {
                draft = draft.with_ended_at(parse_when(&until)?);
            }
            if let Some(ml) = amount_ml {
                draft = draft.with_amount_ml(ml);
            }
            apply_common(draft, common)
        }
        LogEntry::Sleep {
            sleep_type,
            at,
            until,
            common,
        } => {
            let (baby, by) = subject(&common, settings)?;
            let mut draft =
                RecordDraft::sleep(baby, by, sleep_type, parse_when_or_now(at.as_deref())?);
            if let Some(until) = until {
                draft = draft.with_ended_at(parse_when(&until)?);
            }
            apply_common(draft, common)
        }
        LogEntry::Diaper {
            diaper_type,
            at,
            common,
        } => {
            let (baby, by) = subject(&common, settings)?;
            let draft =
                RecordDraft::diaper(baby, by, diaper_type, parse_when_or_now(at.as_deref())?);
            apply_common(draft, common)
        }
    };
    Ok(draft)
}

async fn save(care: &CareLog, draft: RecordDraft) -> anyhow::Result<()> {
    match care.write(draft).await {
        Ok(record) => println!("Saved {record}"),
        Err(Error::DeliveryPending { id, source }) => {
            println!("Saved locally [{id}]. Will sync later ({source}).");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn handle_pending(care: &CareLog, action: PendingAction) -> anyhow::Result<()> {
    match action {
        PendingAction::List => {
            let entries = care.pending().await;
            if entries.is_empty() {
                println!("Nothing pending.");
            }
            for entry in entries {
                println!(
                    "{}  {}",
                    entry.queued_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                    entry.payload
                );
            }
        }
        PendingAction::Dead => {
            let letters = care.dead_letters().await;
            if letters.is_empty() {
                println!("No rejected records.");
            }
            for letter in letters {
                println!("{}", letter.entry.payload);
                println!("    {}", letter.error);
            }
        }
        PendingAction::Requeue { ids } => {
            let moved = care.requeue_dead_letters(&ids).await;
            println!("Requeued {moved} records. Run 'carelog sync' to deliver them.");
        }
    }
    Ok(())
}

async fn handle_timer(
    care: &CareLog,
    settings: &Settings,
    action: TimerAction,
) -> anyhow::Result<()> {
    match action {
        TimerAction::Start { target } => {
            let kind = match target {
                TimerTarget::Feeding { feeding_type } => TimerKind::Feeding { feeding_type },
                TimerTarget::Sleep { sleep_type } => TimerKind::Sleep { sleep_type },
            };
            print_timer(&care.start_timer(kind).await?);
        }
        TimerAction::Pause => print_timer(&care.pause_timer().await?),
        TimerAction::Resume => print_timer(&care.resume_timer().await?),
        TimerAction::Status => match care.timer_status().await {
            Some(status) => print_timer(&status),
            None => println!("No active timer."),
        },
        TimerAction::Stop { discard, common } => {
            // Resolved up front so a missing setting does not cost the session.
            let who = if discard {
                None
            } else {
                Some(subject(&common, settings)?)
            };
            let Some(stopped) = care.stop_timer().await else {
                println!("No active timer.");
                return Ok(());
            };
            println!(
                "Stopped {} after {}",
                stopped.kind,
                format_seconds(stopped.duration_seconds)
            );
            if let Some((baby, by)) = who {
                let draft = apply_common(stopped.into_draft(baby, by), common);
                save(care, draft).await?;
            }
        }
        TimerAction::Reset => {
            care.reset_timer().await;
            println!("Timer discarded.");
        }
    }
    Ok(())
}

async fn handle_config(db: &carelog::Database, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match db.config_get(&key).await? {
            Some(v) => println!("{key} = {}", display_value(&key, &v)),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            config::validate_setting(&key, &value)?;
            db.config_set(&key, value.trim()).await?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            let items = db.config_list().await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    println!("{k} = {}", display_value(&k, &v));
                }
            }
        }
    }
    Ok(())
}

fn display_value(key: &str, value: &str) -> String {
    if key == config::BACKEND_API_KEY {
        let chars: Vec<char> = value.chars().collect();
        let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
        format!("****{tail}")
    } else {
        value.to_string()
    }
}

async fn print_status(db: &carelog::Database, care: &CareLog) -> anyhow::Result<()> {
    let backend = match carelog::BackendConfig::load(db).await {
        Ok(Some(config)) => config.url.to_string(),
        Ok(None) => "not configured (offline)".to_string(),
        Err(e) => format!("invalid: {e}"),
    };
    let pending = care.pending().await;
    let dead = care.dead_letters().await;

    println!("Care Log Status");
    println!("  Backend:  {backend}");
    println!("  Pending:  {}", pending.len());
    for kind in RecordKind::ALL {
        let count = pending.iter().filter(|e| e.record_kind == kind).count();
        if count > 0 {
            println!("    {kind}: {count}");
        }
    }
    println!("  Rejected: {}", dead.len());
    match care.timer_status().await {
        Some(status) => {
            print!("  Timer:    ");
            print_timer(&status);
        }
        None => println!("  Timer:    none"),
    }
    Ok(())
}

fn format_seconds(secs: u64) -> String {
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

fn print_timer(status: &TimerStatus) {
    println!(
        "{} {:?} {} (started {})",
        status.kind,
        status.state,
        format_seconds(status.elapsed_seconds),
        status.started_at.with_timezone(&Local).format("%H:%M")
    );
}

fn print_sync_report(report: &SyncReport) {
    println!("Sync");
    println!("  Status:   {:?}", report.status);
    println!("  Synced:   {} records", report.items_synced);
    println!("  Pending:  {} records", report.items_failed);
    println!("  Rejected: {} records", report.items_dead_lettered);
    if let Some(ref err) = report.error {
        println!("  Error:    {err}");
    }
}
