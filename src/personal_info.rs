use std::fs;
use std::io;
use std::path::Path;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};
use crate::settings::write_atomic;

const PLACEHOLDERS: &[(&str, &str)] = &[
    ("First Name", "John"),
    ("Last Name", "Doe"),
    ("Email", "john.doe@example.com"),
    ("Password", "password123"),
    ("Phone Number", "+1 (555) 123-4567"),
    ("Address Line 1", "123 Main St"),
    ("City", "Anytown"),
    ("State", "CA"),
    ("Zip Code", "12345"),
    ("Full Address", "123 Main St, Anytown, CA 12345"),
    ("University", "State University"),
    ("Degree", "BS in Computer Science"),
];

/// Free-form label to value mapping backing the clipboard panel. Labels keep
/// the order they have in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonalInfo {
    entries: Vec<(String, String)>,
}

impl Default for PersonalInfo {
    fn default() -> Self {
        Self {
            entries: PLACEHOLDERS
                .iter()
                .map(|(label, value)| (label.to_string(), value.to_string()))
                .collect(),
        }
    }
}

impl PersonalInfo {
    /// Returns the placeholder set when the file does not exist yet.
    pub fn load(path: &Path) -> AppResult<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(target: "personal_info", path = %path.display(), "using placeholder info");
                return Ok(Self::default());
            }
            Err(err) => return Err(AppError::Io(err)),
        };
        let map: Map<String, Value> = serde_json::from_str(&contents)?;
        let entries = map
            .into_iter()
            .map(|(label, value)| {
                let value = match value {
                    Value::String(text) => text,
                    Value::Null => String::new(),
                    other => {
                        warn!(target: "personal_info", %label, "non-string value coerced to text");
                        other.to_string()
                    }
                };
                (label, value)
            })
            .collect();
        Ok(Self { entries })
    }

    pub fn save(&self, path: &Path) -> AppResult<()> {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(label, value)| (label.clone(), Value::String(value.clone())))
            .collect();
        write_atomic(path, serde_json::to_string_pretty(&map)?.as_bytes())
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == label)
            .map(|(_, value)| value.as_str())
    }

    /// Updates in place, or appends a new label at the end.
    pub fn set(&mut self, label: impl Into<String>, value: impl Into<String>) {
        let label = label.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == label) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((label, value)),
        }
    }

    pub fn remove(&mut self, label: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| existing != label);
        self.entries.len() != before
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(label, value)| (label.as_str(), value.as_str()))
    }
}
