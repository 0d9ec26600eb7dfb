use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::errors::{AppError, AppResult};
use crate::paths::AppPaths;

const KEY_SYNC: &str = "ENABLE_GOOGLE_SYNC";
const KEY_DATA_FILE: &str = "DATA_FILE_PATH";
const KEY_SERVICE_ACCOUNT: &str = "SERVICE_ACCOUNT_FILE";
const KEY_SPREADSHEET: &str = "SPREADSHEET_ID";
const KEY_THEME: &str = "theme";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Theme {
    #[serde(alias = "light", alias = "LIGHT")]
    Light,
    #[serde(alias = "dark", alias = "DARK")]
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "Light",
            Theme::Dark => "Dark",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            _ => Err(AppError::Validation(format!("unknown theme: {value}"))),
        }
    }
}

/// The user-facing settings file, in the on-disk key spelling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "ENABLE_GOOGLE_SYNC")]
    pub sync_enabled: bool,
    #[serde(rename = "DATA_FILE_PATH")]
    pub data_file_path: PathBuf,
    #[serde(rename = "SERVICE_ACCOUNT_FILE")]
    pub service_account_file: PathBuf,
    #[serde(rename = "SPREADSHEET_ID")]
    pub spreadsheet_id: String,
    pub theme: Theme,
}

/// Partial update applied field-by-field over whatever is on disk.
#[derive(Debug, Clone, Default)]
pub struct SettingsPatch {
    pub sync_enabled: Option<bool>,
    pub data_file_path: Option<PathBuf>,
    pub service_account_file: Option<PathBuf>,
    pub spreadsheet_id: Option<String>,
    pub theme: Option<Theme>,
}

impl SettingsPatch {
    fn apply(&self, map: &mut Map<String, Value>) {
        if let Some(enabled) = self.sync_enabled {
            map.insert(KEY_SYNC.into(), Value::Bool(enabled));
        }
        if let Some(path) = &self.data_file_path {
            map.insert(KEY_DATA_FILE.into(), path_value(path));
        }
        if let Some(path) = &self.service_account_file {
            map.insert(KEY_SERVICE_ACCOUNT.into(), path_value(path));
        }
        if let Some(id) = &self.spreadsheet_id {
            map.insert(KEY_SPREADSHEET.into(), Value::String(id.trim().to_string()));
        }
        if let Some(theme) = self.theme {
            map.insert(KEY_THEME.into(), Value::String(theme.as_str().into()));
        }
    }
}

impl Settings {
    pub fn defaults(paths: &AppPaths) -> Self {
        Self {
            sync_enabled: false,
            data_file_path: paths.default_data_file(),
            service_account_file: paths.default_service_account_file(),
            spreadsheet_id: String::new(),
            theme: Theme::Light,
        }
    }

    /// Sync needs a readable key file and a target spreadsheet.
    pub fn validate_for_sync(&self) -> AppResult<()> {
        if !self.service_account_file.is_file() {
            return Err(AppError::Validation(format!(
                "service account file {} does not exist",
                self.service_account_file.display()
            )));
        }
        if self.spreadsheet_id.trim().is_empty() {
            return Err(AppError::Validation("spreadsheet id cannot be empty".into()));
        }
        Ok(())
    }

    fn to_map(&self) -> AppResult<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Err(AppError::Config("settings must serialize to an object".into())),
        }
    }
}

/// Load-once, merge-on-write store for the settings file.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    defaults: Settings,
}

impl SettingsStore {
    pub fn new(paths: &AppPaths) -> Self {
        Self {
            path: paths.settings_file(),
            defaults: Settings::defaults(paths),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file: defaults are written and returned. Malformed file:
    /// defaults are returned and the file is left untouched. Missing keys are
    /// backfilled and persisted.
    pub fn load(&self) -> AppResult<Settings> {
        let mut map = match self.read_map() {
            Ok(map) => map,
            Err(AppError::FileMissing(_)) => {
                let defaults = self.defaults.clone();
                write_map(&self.path, &defaults.to_map()?)?;
                info!(
                    target: "settings",
                    path = %self.path.display(),
                    "initialized settings file with defaults"
                );
                return Ok(defaults);
            }
            Err(AppError::ConfigCorrupt(reason)) => {
                warn!(
                    target: "settings",
                    path = %self.path.display(),
                    %reason,
                    "settings file is malformed; using defaults"
                );
                return Ok(self.defaults.clone());
            }
            Err(err) => return Err(err),
        };

        let mut backfilled = false;
        for (key, value) in self.defaults.to_map()? {
            if !map.contains_key(&key) {
                map.insert(key, value);
                backfilled = true;
            }
        }

        let settings = match decode(&map) {
            Ok(settings) => settings,
            Err(reason) => {
                warn!(
                    target: "settings",
                    path = %self.path.display(),
                    %reason,
                    "settings file has invalid values; using defaults"
                );
                return Ok(self.defaults.clone());
            }
        };

        if backfilled {
            debug!(target: "settings", "backfilling missing settings keys");
            write_map(&self.path, &map)?;
        }
        Ok(settings)
    }

    /// Read-merge-write of the whole file. Keys the patch does not name,
    /// including unknown ones, are kept as they are on disk. Known keys whose
    /// stored value no longer parses are reset to their defaults.
    pub fn save(&self, patch: &SettingsPatch) -> AppResult<Settings> {
        let on_disk = match self.read_map() {
            Ok(map) => map,
            Err(AppError::FileMissing(_)) | Err(AppError::ConfigCorrupt(_)) => {
                self.defaults.to_map()?
            }
            Err(err) => return Err(err),
        };
        let mut map = on_disk.clone();
        for (key, value) in self.defaults.to_map()? {
            map.entry(key).or_insert(value);
        }
        patch.apply(&mut map);

        if let Err(reason) = decode(&map) {
            warn!(
                target: "settings",
                path = %self.path.display(),
                %reason,
                "settings file has invalid values; resetting them to defaults"
            );
            map = self.repaired(&on_disk)?;
            patch.apply(&mut map);
        }
        let settings = decode(&map).map_err(AppError::ConfigCorrupt)?;
        write_map(&self.path, &map)?;
        debug!(target: "settings", path = %self.path.display(), "settings updated");
        Ok(settings)
    }

    pub fn toggle_theme(&self) -> AppResult<Settings> {
        let current = self.load()?;
        self.save(&SettingsPatch {
            theme: Some(current.theme.toggled()),
            ..SettingsPatch::default()
        })
    }

    // Defaults, overlaid with every stored value that still decodes.
    fn repaired(&self, on_disk: &Map<String, Value>) -> AppResult<Map<String, Value>> {
        let defaults = self.defaults.to_map()?;
        let mut map = defaults.clone();
        for (key, value) in on_disk {
            if !defaults.contains_key(key) {
                map.insert(key.clone(), value.clone());
            }
        }
        for key in defaults.keys() {
            let Some(stored) = on_disk.get(key) else {
                continue;
            };
            let mut candidate = map.clone();
            candidate.insert(key.clone(), stored.clone());
            if decode(&candidate).is_ok() {
                map = candidate;
            }
        }
        Ok(map)
    }

    fn read_map(&self) -> AppResult<Map<String, Value>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(AppError::FileMissing(self.path.clone()))
            }
            Err(err) => return Err(AppError::Io(err)),
        };
        match serde_json::from_str::<Value>(&contents) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(AppError::ConfigCorrupt("expected a JSON object".into())),
            Err(err) => Err(AppError::ConfigCorrupt(err.to_string())),
        }
    }
}

fn decode(map: &Map<String, Value>) -> Result<Settings, String> {
    serde_json::from_value(Value::Object(map.clone())).map_err(|err| err.to_string())
}

fn path_value(path: &Path) -> Value {
    Value::String(path.to_string_lossy().into_owned())
}

/// Writes to a sibling temp file and renames over the target so a crash never
/// leaves a truncated settings file behind.
fn write_map(path: &Path, map: &Map<String, Value>) -> AppResult<()> {
    write_atomic(path, serde_json::to_string_pretty(map)?.as_bytes())
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .ok_or_else(|| AppError::Path(format!("{} has no file name", path.display())))?;
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}
