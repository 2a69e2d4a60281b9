//! Input file handling: CSV id extraction and the failed-id log reader.

use std::collections::HashSet;
use std::io::BufRead;
use std::path::Path;
use tracing::warn;

use crate::domain::HarvestError;

/// Result of scanning an input CSV.
#[derive(Debug)]
pub struct InputScan {
    /// Valid unique ids in first-seen order.
    pub ids: Vec<String>,
    pub total_rows: usize,
    pub duplicate_count: usize,
    pub invalid_count: usize,
}

/// Read the required `id` column from a CSV file.
///
/// Rows with empty or non-numeric ids are excluded; duplicates collapse to
/// one entry. A missing file or missing `id` column is fatal.
pub fn scan_input(path: &Path) -> Result<InputScan, HarvestError> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| HarvestError::Input(format!("cannot read {}: {}", path.display(), e)))?;

    let headers = reader
        .headers()
        .map_err(|e| HarvestError::Input(format!("cannot read CSV header: {}", e)))?
        .clone();
    let id_index = headers
        .iter()
        .position(|h| h.trim() == "id")
        .ok_or_else(|| {
            HarvestError::Input(format!(
                "input file {} has no 'id' column (found: {})",
                path.display(),
                headers.iter().collect::<Vec<_>>().join(", ")
            ))
        })?;

    let mut seen = HashSet::new();
    let mut scan = InputScan {
        ids: Vec::new(),
        total_rows: 0,
        duplicate_count: 0,
        invalid_count: 0,
    };

    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!("⚠️ skipping malformed CSV row: {}", e);
                scan.invalid_count += 1;
                continue;
            }
        };
        scan.total_rows += 1;

        let raw = row.get(id_index).unwrap_or("").trim();
        if raw.is_empty() {
            continue;
        }
        if !raw.chars().all(|c| c.is_ascii_digit()) {
            scan.invalid_count += 1;
            continue;
        }
        if seen.insert(raw.to_string()) {
            scan.ids.push(raw.to_string());
        } else {
            scan.duplicate_count += 1;
        }
    }

    Ok(scan)
}

/// Read raw ids from a failed-id log, deduplicated in first-seen order.
pub fn read_failed_ids(path: &Path) -> Result<Vec<String>, HarvestError> {
    let file = std::fs::File::open(path)
        .map_err(|e| HarvestError::Input(format!("cannot read {}: {}", path.display(), e)))?;

    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for line in std::io::BufReader::new(file).lines() {
        let line = line.map_err(|e| HarvestError::persistence("reading failed-id log", e))?;
        let id = line.trim();
        if !id.is_empty() && seen.insert(id.to_string()) {
            ids.push(id.to_string());
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn extracts_valid_unique_ids_in_order() {
        let file = csv_file("id,name\n3,a\n1,b\n3,c\n,d\nabc,e\n2,f\n");
        let scan = scan_input(file.path()).unwrap();
        assert_eq!(scan.ids, vec!["3", "1", "2"]);
        assert_eq!(scan.duplicate_count, 1);
        assert_eq!(scan.invalid_count, 1);
        assert_eq!(scan.total_rows, 6);
    }

    #[test]
    fn missing_id_column_is_fatal() {
        let file = csv_file("product,name\n3,a\n");
        let err = scan_input(file.path()).unwrap_err();
        assert!(matches!(err, HarvestError::Input(_)));
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = scan_input(Path::new("/nonexistent/input.csv")).unwrap_err();
        assert!(matches!(err, HarvestError::Input(_)));
    }

    #[test]
    fn failed_log_reader_dedups_and_trims() {
        let file = csv_file("42\n\n17\n42\n");
        let ids = read_failed_ids(file.path()).unwrap();
        assert_eq!(ids, vec!["42", "17"]);
    }
}
