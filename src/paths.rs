use std::fs;
use std::path::{Path, PathBuf};

use crate::config::RuntimeConfig;
use crate::errors::{AppError, AppResult};

const APP_DIR_NAME: &str = "AppTrackPro";
const CONFIG_DIR: &str = "config";
const DATA_DIR: &str = "Data";

/// Per-user file locations. Nothing here touches the filesystem until
/// [`AppPaths::ensure_dirs`] runs.
#[derive(Clone, Debug)]
pub struct AppPaths {
    base: PathBuf,
}

impl AppPaths {
    pub fn resolve(config: &RuntimeConfig) -> AppResult<Self> {
        if let Some(home) = &config.home_override {
            return Ok(Self::at(home));
        }
        dirs::data_local_dir()
            .map(|dir| Self::at(dir.join(APP_DIR_NAME)))
            .ok_or_else(|| AppError::Path("cannot determine local data directory".into()))
    }

    pub fn at(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn ensure_dirs(&self) -> AppResult<()> {
        fs::create_dir_all(self.config_dir())?;
        fs::create_dir_all(self.data_dir())?;
        Ok(())
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn config_dir(&self) -> PathBuf {
        self.base.join(CONFIG_DIR)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.base.join(DATA_DIR)
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_dir().join("app_config.json")
    }

    pub fn default_service_account_file(&self) -> PathBuf {
        self.config_dir().join("service_account.json")
    }

    pub fn default_data_file(&self) -> PathBuf {
        self.data_dir().join("Applications.csv")
    }

    pub fn personal_info_file(&self) -> PathBuf {
        self.data_dir().join("personal_info.json")
    }
}
