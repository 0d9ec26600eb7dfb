mod commands;
mod config;
mod errors;
mod local_store;
mod paths;
mod personal_info;
mod records;
mod settings;
mod sheets;
mod sync;

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use commands::{list_applications, set_setting, RecordView, StatusReport};
pub use config::{DeleteStrategy, PublicRuntimeConfig, RuntimeConfig};
pub use errors::{AppError, AppResult};
pub use local_store::{read_table, write_table};
pub use paths::AppPaths;
pub use personal_info::PersonalInfo;
pub use records::{
    parse_date, ApplicationRecord, ApplicationTable, Column, NewApplication, RecordId, Status,
    DATE_FORMAT, HEADERS,
};
pub use settings::{Settings, SettingsPatch, SettingsStore, Theme};
pub use sheets::{RemoteTable, ServiceAccountKey, Session, SheetsClient, SheetsRemote};
pub use sync::{
    DriverOptions, PullOutcome, PushOutcome, SyncDriver, SyncTimer, TableObserver,
};

/// Everything one running instance owns: resolved locations, the settings
/// store and the driver holding the in-memory table.
pub struct App {
    config: RuntimeConfig,
    paths: AppPaths,
    settings: SettingsStore,
    driver: Arc<SyncDriver>,
}

impl App {
    pub fn initialize(config: RuntimeConfig) -> AppResult<Self> {
        init_tracing();
        let paths = AppPaths::resolve(&config)?;
        paths.ensure_dirs()?;

        let store = SettingsStore::new(&paths);
        let settings = store.load()?;
        let table = read_table(&settings.data_file_path)?;
        let remote = build_remote(&config, &settings)?;
        if settings.sync_enabled && remote.is_none() {
            warn!("google sync is enabled but SPREADSHEET_ID is empty; sync will be skipped");
        }

        let driver = SyncDriver::new(
            DriverOptions {
                data_file: settings.data_file_path.clone(),
                sync_enabled: settings.sync_enabled,
                delete_strategy: config.delete_strategy,
                settings: store.clone(),
                remote,
            },
            table,
        );
        info!(
            base = %paths.base().display(),
            records = driver.current_table().len(),
            sync_enabled = settings.sync_enabled,
            "application tracker ready"
        );

        Ok(Self {
            config,
            paths,
            settings: store,
            driver: Arc::new(driver),
        })
    }

    pub fn driver(&self) -> &Arc<SyncDriver> {
        &self.driver
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Rebuilds the driver's remote from the settings file, so a new
    /// spreadsheet id or key file is used without a restart.
    pub fn refresh_remote(&self) -> AppResult<()> {
        let settings = self.settings.load()?;
        self.driver.set_remote(build_remote(&self.config, &settings)?);
        Ok(())
    }

    pub fn personal_info(&self) -> AppResult<PersonalInfo> {
        PersonalInfo::load(&self.paths.personal_info_file())
    }

    pub fn save_personal_info(&self, info: &PersonalInfo) -> AppResult<()> {
        info.save(&self.paths.personal_info_file())
    }

    pub fn status(&self) -> AppResult<StatusReport> {
        let settings = self.settings.load()?;
        Ok(StatusReport::new(
            self.paths.base().display().to_string(),
            self.settings.path().display().to_string(),
            self.driver.data_file().display().to_string(),
            self.driver.current_table().len(),
            self.driver.sync_enabled(),
            !settings.spreadsheet_id.trim().is_empty(),
            settings.service_account_file.is_file(),
            settings.theme,
            self.config.public_profile(),
        ))
    }
}

/// A remote is built whenever a spreadsheet is named, so toggling sync on
/// later needs no restart. Authentication is deferred to the first call.
fn build_remote(
    config: &RuntimeConfig,
    settings: &Settings,
) -> AppResult<Option<Arc<dyn RemoteTable>>> {
    let spreadsheet_id = settings.spreadsheet_id.trim();
    if spreadsheet_id.is_empty() {
        return Ok(None);
    }
    let client = SheetsClient::new(config)?;
    Ok(Some(Arc::new(SheetsRemote::new(
        client,
        settings.service_account_file.clone(),
        spreadsheet_id,
        config.sheets_range.clone(),
        config.sheet_id,
    ))))
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,apptrack=debug,apptrack_lib=debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init();
    });
}
