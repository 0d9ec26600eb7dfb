use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info};

use crate::errors::{AppError, AppResult};
use crate::records::ApplicationTable;
use crate::settings::write_atomic;

const UTF8_BOM: char = '\u{feff}';

/// Reads the applications file. A missing file is an empty table; anything
/// that cannot be decoded is [`AppError::CorruptFile`].
pub fn read_table(path: &Path) -> AppResult<ApplicationTable> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(
                target: "local_store",
                path = %path.display(),
                "applications file missing; starting with an empty table"
            );
            return Ok(ApplicationTable::new());
        }
        Err(err) => return Err(AppError::Io(err)),
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes.as_slice());

    let mut grid: Vec<Vec<String>> = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|err| AppError::corrupt(path, err))?;
        grid.push(row.iter().map(str::to_string).collect());
    }
    if let Some(first) = grid.first_mut().and_then(|row| row.first_mut()) {
        if first.starts_with(UTF8_BOM) {
            *first = first.trim_start_matches(UTF8_BOM).to_string();
        }
    }

    ApplicationTable::from_grid(&grid).map_err(|err| AppError::corrupt(path, err))
}

/// Rewrites the whole file from `table`. The previous contents are replaced,
/// never merged.
pub fn write_table(table: &ApplicationTable, path: &Path) -> AppResult<()> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    for row in table.to_grid() {
        writer.write_record(&row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| AppError::Io(err.into_error()))?;
    write_atomic(path, &bytes)?;
    info!(
        target: "local_store",
        path = %path.display(),
        rows = table.len(),
        "applications saved locally"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Column, NewApplication, Status, HEADERS};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn sample_table() -> ApplicationTable {
        let day = NaiveDate::from_ymd_opt(2024, 5, 17).unwrap();
        let mut table = ApplicationTable::new();
        table.push(
            NewApplication::new("Acme, Inc.", "Backend \"Rust\" Engineer", "https://acme.jobs/1")
                .into_record(day)
                .unwrap(),
        );
        table.push(
            NewApplication::new("Globex", "SRE", "")
                .into_record(day)
                .unwrap(),
        );
        table.set_field(1, Column::Status, "Interview").unwrap();
        table.set_field(1, Column::DateApplied, "").unwrap();
        table
    }

    #[test]
    fn missing_file_reads_as_empty_table() {
        let dir = tempdir().unwrap();
        let table = read_table(&dir.path().join("Applications.csv")).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn write_then_read_preserves_rows_and_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Data").join("Applications.csv");
        let table = sample_table();

        write_table(&table, &path).unwrap();
        let loaded = read_table(&path).unwrap();

        assert_eq!(loaded, table);
        assert_eq!(loaded.get(1).unwrap().status, Status::Interview);
        assert_eq!(loaded.get(1).unwrap().date_applied, None);
    }

    #[test]
    fn written_file_starts_with_canonical_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Applications.csv");
        write_table(&ApplicationTable::new(), &path).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim_end(), HEADERS.join(","));
        assert!(read_table(&path).unwrap().is_empty());
    }

    #[test]
    fn write_overwrites_previous_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Applications.csv");
        write_table(&sample_table(), &path).unwrap();
        write_table(&ApplicationTable::new(), &path).unwrap();
        assert!(read_table(&path).unwrap().is_empty());
    }

    #[test]
    fn bom_prefixed_header_is_accepted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Applications.csv");
        fs::write(
            &path,
            "\u{feff}Company,Position,Application Portal URL,Date Applied,Status\nAcme,Dev,,2024-01-01,Offer\n",
        )
        .unwrap();
        let table = read_table(&path).unwrap();
        assert_eq!(table.get(0).unwrap().status, Status::Offer);
    }

    #[test]
    fn undecodable_file_is_reported_as_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Applications.csv");
        fs::write(&path, "Company,Position\nAcme,Dev\n").unwrap();
        assert!(matches!(
            read_table(&path),
            Err(AppError::CorruptFile { .. })
        ));

        fs::write(
            &path,
            "Company,Position,Application Portal URL,Date Applied,Status\nAcme,Dev,,yesterday,Offer\n",
        )
        .unwrap();
        assert!(matches!(
            read_table(&path),
            Err(AppError::CorruptFile { .. })
        ));
    }
}
