//! Merge completed batch files into one JSON array.

use serde_json::Value;
use std::path::Path;
use tracing::{info, warn};

use crate::domain::HarvestError;
use crate::infrastructure::wal::list_batch_files;

/// Concatenate every batch file in `data_dir` into `output`, preserving
/// batch order. Corrupt files are skipped with a warning. Returns the
/// number of merged records.
pub fn merge_batches(data_dir: &Path, output: &Path) -> Result<usize, HarvestError> {
    let files = list_batch_files(data_dir)?;
    let mut all: Vec<Value> = Vec::new();
    let mut merged_files = 0;

    for path in &files {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("⚠️ skipping unreadable file {}: {}", path.display(), e);
                continue;
            }
        };
        match serde_json::from_str::<Vec<Value>>(&contents) {
            Ok(mut items) => {
                all.append(&mut items);
                merged_files += 1;
            }
            Err(e) => {
                warn!("⚠️ skipping corrupt file {}: {}", path.display(), e);
            }
        }
    }

    let body = serde_json::to_vec_pretty(&all)?;
    std::fs::write(output, body)
        .map_err(|e| HarvestError::persistence("writing merged output", e))?;

    info!(
        "✅ merged {} files, {} records -> {}",
        merged_files,
        all.len(),
        output.display()
    );
    Ok(all.len())
}
