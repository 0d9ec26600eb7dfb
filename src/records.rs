use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDate;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
const RECORD_ID_LEN: usize = 16;

pub const HEADERS: [&str; 5] = [
    "Company",
    "Position",
    "Application Portal URL",
    "Date Applied",
    "Status",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Column {
    Company,
    Position,
    PortalUrl,
    DateApplied,
    Status,
}

impl Column {
    pub const ALL: [Column; 5] = [
        Column::Company,
        Column::Position,
        Column::PortalUrl,
        Column::DateApplied,
        Column::Status,
    ];

    pub fn index(&self) -> usize {
        match self {
            Column::Company => 0,
            Column::Position => 1,
            Column::PortalUrl => 2,
            Column::DateApplied => 3,
            Column::Status => 4,
        }
    }

    pub fn header(&self) -> &'static str {
        HEADERS[self.index()]
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        let normalized: String = value
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "company" => Ok(Column::Company),
            "position" | "role" => Ok(Column::Position),
            "applicationportalurl" | "portalurl" | "url" => Ok(Column::PortalUrl),
            "dateapplied" | "date" => Ok(Column::DateApplied),
            "status" => Ok(Column::Status),
            _ => Err(AppError::Validation(format!("unknown column: {value}"))),
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Status {
    #[default]
    Submitted,
    Rejected,
    Interview,
    Offer,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Submitted,
        Status::Rejected,
        Status::Interview,
        Status::Offer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Submitted => "Submitted",
            Status::Rejected => "Rejected",
            Status::Interview => "Interview",
            Status::Offer => "Offer",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(Status::default());
        }
        Status::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "invalid status {trimmed:?}; expected one of Submitted, Rejected, Interview, Offer"
                ))
            })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RecordId(String);

impl RecordId {
    pub fn generate() -> Self {
        Self(
            thread_rng()
                .sample_iter(&Alphanumeric)
                .take(RECORD_ID_LEN)
                .map(char::from)
                .collect(),
        )
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewApplication {
    pub company: String,
    pub position: String,
    pub portal_url: String,
}

impl NewApplication {
    pub fn new(
        company: impl Into<String>,
        position: impl Into<String>,
        portal_url: impl Into<String>,
    ) -> Self {
        Self {
            company: company.into(),
            position: position.into(),
            portal_url: portal_url.into(),
        }
    }

    pub fn into_record(self, applied_on: NaiveDate) -> AppResult<ApplicationRecord> {
        let company = self.company.trim().to_string();
        let position = self.position.trim().to_string();
        if company.is_empty() || position.is_empty() {
            return Err(AppError::Validation(
                "company and position are required fields".into(),
            ));
        }
        Ok(ApplicationRecord {
            id: RecordId::generate(),
            company,
            position,
            portal_url: self.portal_url.trim().to_string(),
            date_applied: Some(applied_on),
            status: Status::Submitted,
        })
    }
}

/// Equality compares field values only; the id is an addressing handle.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationRecord {
    id: RecordId,
    pub company: String,
    pub position: String,
    pub portal_url: String,
    pub date_applied: Option<NaiveDate>,
    pub status: Status,
}

impl PartialEq for ApplicationRecord {
    fn eq(&self, other: &Self) -> bool {
        self.company == other.company
            && self.position == other.position
            && self.portal_url == other.portal_url
            && self.date_applied == other.date_applied
            && self.status == other.status
    }
}

impl Eq for ApplicationRecord {}

impl ApplicationRecord {
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn value(&self, column: Column) -> String {
        match column {
            Column::Company => self.company.clone(),
            Column::Position => self.position.clone(),
            Column::PortalUrl => self.portal_url.clone(),
            Column::DateApplied => self
                .date_applied
                .map(|date| date.format(DATE_FORMAT).to_string())
                .unwrap_or_default(),
            Column::Status => self.status.as_str().to_string(),
        }
    }

    pub fn set(&mut self, column: Column, value: &str) -> AppResult<()> {
        let trimmed = value.trim();
        match column {
            Column::Company | Column::Position if trimmed.is_empty() => {
                Err(AppError::Validation(format!("{column} cannot be empty")))
            }
            Column::Company => {
                self.company = trimmed.to_string();
                Ok(())
            }
            Column::Position => {
                self.position = trimmed.to_string();
                Ok(())
            }
            Column::PortalUrl => {
                self.portal_url = trimmed.to_string();
                Ok(())
            }
            Column::DateApplied => {
                self.date_applied = parse_date(trimmed)?;
                Ok(())
            }
            Column::Status => {
                self.status = Status::parse(trimmed)?;
                Ok(())
            }
        }
    }

    pub fn to_row(&self) -> Vec<String> {
        Column::ALL.iter().map(|column| self.value(*column)).collect()
    }

    fn matches(&self, needle: &str) -> bool {
        Column::ALL
            .iter()
            .any(|column| self.value(*column).to_lowercase().contains(needle))
    }

    fn from_cells(cells: [&str; 5]) -> AppResult<Self> {
        Ok(Self {
            id: RecordId::generate(),
            company: cells[0].trim().to_string(),
            position: cells[1].trim().to_string(),
            portal_url: cells[2].trim().to_string(),
            date_applied: parse_date(cells[3])?,
            status: Status::parse(cells[4])?,
        })
    }
}

pub fn parse_date(value: &str) -> AppResult<Option<NaiveDate>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let candidate = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(candidate, DATE_FORMAT)
        .map(Some)
        .map_err(|err| AppError::Validation(format!("invalid date {trimmed:?}: {err}")))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplicationTable {
    records: Vec<ApplicationRecord>,
}

impl ApplicationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<ApplicationRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ApplicationRecord] {
        &self.records
    }

    pub fn get(&self, position: usize) -> Option<&ApplicationRecord> {
        self.records.get(position)
    }

    pub fn position_of(&self, id: &RecordId) -> Option<usize> {
        self.records.iter().position(|record| record.id() == id)
    }

    pub fn push(&mut self, record: ApplicationRecord) {
        self.records.push(record);
    }

    pub fn set_field(&mut self, position: usize, column: Column, value: &str) -> AppResult<()> {
        let len = self.records.len();
        let record = self
            .records
            .get_mut(position)
            .ok_or_else(|| row_not_found(position, len))?;
        record.set(column, value)
    }

    /// Removes every listed position, or nothing if any is out of range.
    /// Survivors are renumbered from zero.
    pub fn remove_positions(&mut self, positions: &[usize]) -> AppResult<Vec<ApplicationRecord>> {
        let unique: BTreeSet<usize> = positions.iter().copied().collect();
        if let Some(&bad) = unique.iter().find(|&&pos| pos >= self.records.len()) {
            return Err(row_not_found(bad, self.records.len()));
        }
        let mut removed: Vec<ApplicationRecord> = unique
            .iter()
            .rev()
            .map(|&pos| self.records.remove(pos))
            .collect();
        removed.reverse();
        Ok(removed)
    }

    pub fn search(&self, term: &str) -> Vec<(usize, &ApplicationRecord)> {
        let needle = term.trim().to_lowercase();
        self.records
            .iter()
            .enumerate()
            .filter(|(_, record)| needle.is_empty() || record.matches(&needle))
            .collect()
    }

    /// Carries ids over from `previous` for rows that are unchanged at the
    /// same position, so handles survive a refresh that did not touch them.
    pub fn adopt_ids_from(&mut self, previous: &ApplicationTable) {
        for (record, old) in self.records.iter_mut().zip(previous.records.iter()) {
            if record == old {
                record.id = old.id.clone();
            }
        }
    }

    pub fn to_grid(&self) -> Vec<Vec<String>> {
        let mut grid = Vec::with_capacity(self.records.len() + 1);
        grid.push(HEADERS.iter().map(|h| h.to_string()).collect());
        grid.extend(self.records.iter().map(ApplicationRecord::to_row));
        grid
    }

    /// Decodes a grid whose first row names the columns. Columns may come in
    /// any order; short rows are padded and fully blank rows are skipped.
    pub fn from_grid<S: AsRef<str>>(grid: &[Vec<S>]) -> AppResult<Self> {
        let Some((header, rows)) = grid.split_first() else {
            return Ok(Self::new());
        };
        let layout = HeaderLayout::from_header(header)?;
        let mut records = Vec::with_capacity(rows.len());
        for (line, row) in rows.iter().enumerate() {
            if row.iter().all(|cell| cell.as_ref().trim().is_empty()) {
                continue;
            }
            let record = layout.decode(row).map_err(|err| {
                AppError::Validation(format!("row {}: {err}", line + 2))
            })?;
            records.push(record);
        }
        Ok(Self { records })
    }
}

struct HeaderLayout {
    offsets: [usize; 5],
}

impl HeaderLayout {
    fn from_header<S: AsRef<str>>(header: &[S]) -> AppResult<Self> {
        let mut offsets = [usize::MAX; 5];
        for (offset, name) in header.iter().enumerate() {
            if let Ok(column) = Column::parse(name.as_ref()) {
                if offsets[column.index()] == usize::MAX {
                    offsets[column.index()] = offset;
                }
            }
        }
        if let Some(missing) = Column::ALL
            .iter()
            .find(|column| offsets[column.index()] == usize::MAX)
        {
            return Err(AppError::Validation(format!(
                "header row is missing the {missing} column"
            )));
        }
        Ok(Self { offsets })
    }

    fn decode<S: AsRef<str>>(&self, row: &[S]) -> AppResult<ApplicationRecord> {
        ApplicationRecord::from_cells([
            self.cell(row, Column::Company),
            self.cell(row, Column::Position),
            self.cell(row, Column::PortalUrl),
            self.cell(row, Column::DateApplied),
            self.cell(row, Column::Status),
        ])
    }

    fn cell<'a, S: AsRef<str>>(&self, row: &'a [S], column: Column) -> &'a str {
        row.get(self.offsets[column.index()])
            .map(|value| value.as_ref())
            .unwrap_or("")
    }
}

fn row_not_found(position: usize, len: usize) -> AppError {
    AppError::NotFound(format!("row {position} does not exist (table has {len} rows)"))
}
