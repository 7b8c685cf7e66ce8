use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::storage::Database;
use crate::sync::SyncOptions;

// ── Setting keys (app_config table) ────────────────────────────────

pub const BACKEND_URL: &str = "backend_url";
pub const BACKEND_API_KEY: &str = "backend_api_key";
pub const REQUEST_TIMEOUT_SECS: &str = "request_timeout_secs";
pub const BABY_ID: &str = "baby_id";
pub const RECORDED_BY: &str = "recorded_by";
pub const DEAD_LETTER_PERMANENT: &str = "dead_letter_permanent";

pub const KNOWN_KEYS: &[&str] = &[
    BACKEND_URL,
    BACKEND_API_KEY,
    REQUEST_TIMEOUT_SECS,
    BABY_ID,
    RECORDED_BY,
    DEAD_LETTER_PERMANENT,
];

/// Environment overrides, applied over stored settings.
pub const ENV_BACKEND_URL: &str = "CARELOG_BACKEND_URL";
pub const ENV_API_KEY: &str = "CARELOG_API_KEY";

pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Connection settings for the remote backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    pub url: Url,
    pub api_key: String,
    pub timeout: Duration,
}

impl BackendConfig {
    /// Load from stored settings and the environment. Returns `None` when no
    /// backend URL is configured anywhere.
    pub async fn load(db: &Database) -> Result<Option<Self>> {
        let url = match std::env::var(ENV_BACKEND_URL) {
            Ok(url) => Some(url),
            Err(_) => db.config_get(BACKEND_URL).await?,
        };
        let api_key = match std::env::var(ENV_API_KEY) {
            Ok(key) => Some(key),
            Err(_) => db.config_get(BACKEND_API_KEY).await?,
        };
        let timeout = db.config_get(REQUEST_TIMEOUT_SECS).await?;
        Self::from_parts(url, api_key, timeout)
    }

    pub fn from_parts(
        url: Option<String>,
        api_key: Option<String>,
        timeout_secs: Option<String>,
    ) -> Result<Option<Self>> {
        let Some(url) = url.filter(|u| !u.trim().is_empty()) else {
            return Ok(None);
        };
        let url = parse_backend_url(&url)?;
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                Error::Config(format!(
                    "{BACKEND_URL} is set but {BACKEND_API_KEY} is not \
                     (run: carelog config set {BACKEND_API_KEY} <key>)"
                ))
            })?;
        let timeout = match timeout_secs {
            Some(raw) => Duration::from_secs(parse_timeout(&raw)?),
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };
        Ok(Some(Self {
            url,
            api_key,
            timeout,
        }))
    }
}

/// Defaults applied to records and sync passes.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub baby_id: Option<String>,
    pub recorded_by: Option<String>,
    pub sync: SyncOptions,
}

impl Settings {
    pub async fn load(db: &Database) -> Result<Self> {
        let dead_letter_permanent = match db.config_get(DEAD_LETTER_PERMANENT).await? {
            Some(raw) => parse_bool(&raw)?,
            None => SyncOptions::default().dead_letter_permanent,
        };
        Ok(Self {
            baby_id: db.config_get(BABY_ID).await?,
            recorded_by: db.config_get(RECORDED_BY).await?,
            sync: SyncOptions {
                dead_letter_permanent,
            },
        })
    }
}

/// Check a value before it is stored under `key`.
pub fn validate_setting(key: &str, value: &str) -> Result<()> {
    match key {
        BACKEND_URL => parse_backend_url(value).map(|_| ()),
        REQUEST_TIMEOUT_SECS => parse_timeout(value).map(|_| ()),
        DEAD_LETTER_PERMANENT => parse_bool(value).map(|_| ()),
        BACKEND_API_KEY | BABY_ID | RECORDED_BY => {
            if value.trim().is_empty() {
                Err(Error::Config(format!("{key} cannot be empty")))
            } else {
                Ok(())
            }
        }
        other => Err(Error::Config(format!(
            "unknown setting '{other}' (known: {})",
            KNOWN_KEYS.join(", ")
        ))),
    }
}

pub fn parse_backend_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| Error::Config(format!("invalid backend URL '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::Config(format!(
            "backend URL must use http or https, got '{other}'"
        ))),
    }
}

fn parse_timeout(raw: &str) -> Result<u64> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(Error::Config(format!(
            "{REQUEST_TIMEOUT_SECS} must be a positive number of seconds, got '{raw}'"
        ))),
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(Error::Config(format!("expected true or false, got '{raw}'"))),
    }
}
