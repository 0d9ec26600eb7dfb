use std::path::PathBuf;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::config::PublicRuntimeConfig;
use crate::errors::{AppError, AppResult};
use crate::records::{ApplicationRecord, Status};
use crate::settings::{Settings, SettingsPatch, Theme};
use crate::App;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub base_dir: String,
    pub settings_file: String,
    pub data_file: String,
    pub records: usize,
    pub sync_enabled: bool,
    pub spreadsheet_configured: bool,
    pub service_account_present: bool,
    pub theme: Theme,
    pub config: PublicRuntimeConfig,
}

impl StatusReport {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        base_dir: String,
        settings_file: String,
        data_file: String,
        records: usize,
        sync_enabled: bool,
        spreadsheet_configured: bool,
        service_account_present: bool,
        theme: Theme,
        config: PublicRuntimeConfig,
    ) -> Self {
        Self {
            base_dir,
            settings_file,
            data_file,
            records,
            sync_enabled,
            spreadsheet_configured,
            service_account_present,
            theme,
            config,
        }
    }
}

/// One table row as the front end shows it. `row` is the current position and
/// goes stale after any delete or pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordView {
    pub row: usize,
    pub id: String,
    pub company: String,
    pub position: String,
    pub portal_url: String,
    pub date_applied: Option<NaiveDate>,
    pub status: Status,
}

impl RecordView {
    fn new(row: usize, record: &ApplicationRecord) -> Self {
        Self {
            row,
            id: record.id().to_string(),
            company: record.company.clone(),
            position: record.position.clone(),
            portal_url: record.portal_url.clone(),
            date_applied: record.date_applied,
            status: record.status,
        }
    }
}

pub fn list_applications(app: &App, search: Option<&str>) -> Vec<RecordView> {
    let table = app.driver().current_table();
    table
        .search(search.unwrap_or_default())
        .into_iter()
        .map(|(row, record)| RecordView::new(row, record))
        .collect()
}

/// Applies one `KEY=value` change. Toggling sync goes through the driver so
/// the immediate push happens; the other keys are merge-written as-is.
pub async fn set_setting(app: &App, key: &str, value: &str) -> AppResult<Settings> {
    let normalized = key.trim().to_ascii_uppercase().replace('-', "_");
    let mut patch = SettingsPatch::default();
    let mut remote_changed = false;
    match normalized.as_str() {
        "ENABLE_GOOGLE_SYNC" | "SYNC" => {
            let enabled = parse_flag(value)?;
            let outcome = app.driver().on_sync_toggled(enabled).await?;
            info!(enabled, ?outcome, "sync setting changed");
            return app.settings().load();
        }
        "DATA_FILE_PATH" => {
            patch.data_file_path = Some(PathBuf::from(value.trim()));
            info!("data file path changed; takes effect on next start");
        }
        "SERVICE_ACCOUNT_FILE" => {
            patch.service_account_file = Some(PathBuf::from(value.trim()));
            remote_changed = true;
        }
        "SPREADSHEET_ID" => {
            patch.spreadsheet_id = Some(value.trim().to_string());
            remote_changed = true;
        }
        "THEME" => patch.theme = Some(Theme::parse(value)?),
        _ => {
            return Err(AppError::Validation(format!(
                "unknown setting {key:?}; expected ENABLE_GOOGLE_SYNC, DATA_FILE_PATH, SERVICE_ACCOUNT_FILE, SPREADSHEET_ID or theme"
            )))
        }
    }
    let settings = app.settings().save(&patch)?;
    if remote_changed {
        app.refresh_remote()?;
    }
    Ok(settings)
}

fn parse_flag(value: &str) -> AppResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AppError::Validation(format!("expected true or false, got {other:?}"))),
    }
}
