use std::path::PathBuf;
use std::time::Duration;
use std::{env, io};

use serde::Serialize;
use tracing::debug;

const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
const MIN_SYNC_INTERVAL_SECS: u64 = 5;
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4";
const DEFAULT_SHEETS_RANGE: &str = "Sheet1!A1:E";

/// Which remote primitive the driver uses when rows are deleted locally.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteStrategy {
    /// Rewrite the whole sheet without the deleted rows.
    Overwrite,
    /// Issue one structural row delete per removed row.
    Rows,
}

impl DeleteStrategy {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "rows" | "row" | "structural" => DeleteStrategy::Rows,
            _ => DeleteStrategy::Overwrite,
        }
    }
}

/// Process-level knobs. Read once at startup, never written back.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub home_override: Option<PathBuf>,
    pub sync_interval_secs: u64,
    pub remote_timeout_secs: u64,
    pub sheets_api_base: String,
    pub token_endpoint: Option<String>,
    pub sheets_range: String,
    pub sheet_id: i64,
    pub delete_strategy: DeleteStrategy,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicRuntimeConfig {
    pub sync_interval_secs: u64,
    pub remote_timeout_secs: u64,
    pub sheets_api_base: String,
    pub sheets_range: String,
    pub sheet_id: i64,
    pub delete_strategy: DeleteStrategy,
    pub has_token_endpoint_override: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            home_override: None,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            remote_timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
            sheets_api_base: DEFAULT_SHEETS_API_BASE.to_string(),
            token_endpoint: None,
            sheets_range: DEFAULT_SHEETS_RANGE.to_string(),
            sheet_id: 0,
            delete_strategy: DeleteStrategy::Overwrite,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            home_override: env::var("APPTRACK_HOME")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            sync_interval_secs: parse_u64("SYNC_INTERVAL_SECS", DEFAULT_SYNC_INTERVAL_SECS)
                .max(MIN_SYNC_INTERVAL_SECS),
            remote_timeout_secs: parse_u64("REMOTE_TIMEOUT_SECS", DEFAULT_REMOTE_TIMEOUT_SECS)
                .max(1),
            sheets_api_base: env::var("SHEETS_API_BASE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SHEETS_API_BASE.to_string()),
            token_endpoint: env::var("GOOGLE_TOKEN_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            sheets_range: env::var("SHEETS_RANGE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SHEETS_RANGE.to_string()),
            sheet_id: parse_i64("SHEETS_SHEET_ID", 0),
            delete_strategy: env::var("REMOTE_DELETE_STRATEGY")
                .map(|v| DeleteStrategy::parse(&v))
                .unwrap_or(DeleteStrategy::Overwrite),
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    pub fn public_profile(&self) -> PublicRuntimeConfig {
        PublicRuntimeConfig {
            sync_interval_secs: self.sync_interval_secs,
            remote_timeout_secs: self.remote_timeout_secs,
            sheets_api_base: self.sheets_api_base.clone(),
            sheets_range: self.sheets_range.clone(),
            sheet_id: self.sheet_id,
            delete_strategy: self.delete_strategy,
            has_token_endpoint_override: self.token_endpoint.is_some(),
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(default)
}
