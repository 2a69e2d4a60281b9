//! Id reconciliation: subtract already-persisted work from the input set.

use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

use crate::domain::product::coerce_id;
use crate::infrastructure::wal::list_batch_files;

/// Outcome of reconciling an input id set against an output directory.
#[derive(Debug)]
pub struct ReconcileReport {
    /// Ids still needing work, in input order.
    pub pending: Vec<String>,
    /// Every id found in any parseable batch file.
    pub completed: HashSet<String>,
    pub total_count: usize,
    pub completed_count: usize,
}

/// Scan every batch file in `output_dir` and collect persisted ids.
///
/// A file that fails to parse (corrupt or partially written) is skipped with
/// a warning; one bad file must never fail the whole run.
pub fn scan_completed_ids(output_dir: &Path) -> HashSet<String> {
    let mut completed = HashSet::new();
    let files = match list_batch_files(output_dir) {
        Ok(files) => files,
        Err(e) => {
            warn!("⚠️ could not scan {}: {}", output_dir.display(), e);
            return completed;
        }
    };

    for path in files {
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("⚠️ skipping unreadable batch file {}: {}", path.display(), e);
                continue;
            }
        };
        match serde_json::from_str::<Vec<Value>>(&contents) {
            Ok(items) => {
                for item in items {
                    if let Some(id) = item.get("id").and_then(coerce_id) {
                        completed.insert(id);
                    }
                }
            }
            Err(e) => {
                warn!("⚠️ skipping corrupt batch file {}: {}", path.display(), e);
            }
        }
    }

    completed
}

/// Compute the pending id set for a run.
///
/// Idempotent: repeated calls with unchanged inputs and disk state yield the
/// same report.
pub fn reconcile(input_ids: &[String], output_dir: &Path) -> ReconcileReport {
    let completed = scan_completed_ids(output_dir);
    let pending: Vec<String> = input_ids
        .iter()
        .filter(|id| !completed.contains(*id))
        .cloned()
        .collect();

    info!(
        "🔄 RESUME: {} total | {} already persisted | {} pending",
        input_ids.len(),
        completed.len(),
        pending.len()
    );

    ReconcileReport {
        total_count: input_ids.len(),
        completed_count: completed.len(),
        completed,
        pending,
    }
}
