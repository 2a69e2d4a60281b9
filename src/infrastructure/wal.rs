//! Write-ahead buffer and batch checkpointing.
//!
//! Durability ordering: a fetched record is appended to the on-disk WAL
//! before it counts as persisted; a batch file is fully written and renamed
//! into place before the WAL is rewritten without the flushed records. A
//! crash between the two at worst leaves stale WAL entries, which the
//! append-time dedup and the reconciler's completed-id scan make harmless.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::domain::{HarvestError, ProductRecord};

pub const WAL_FILE_NAME: &str = "temp_buffer.jsonl";
pub const FAILED_LOG_NAME: &str = "failed_products.txt";

lazy_static! {
    static ref BATCH_FILE: Regex =
        Regex::new(r"^products_batch_(\d+)\.json$").expect("static regex");
}

/// Sequence number of a batch file name, if it is one.
pub fn batch_file_seq(name: &str) -> Option<u64> {
    BATCH_FILE
        .captures(name)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// All batch files in a directory, ordered by sequence number.
pub fn list_batch_files(dir: &Path) -> Result<Vec<PathBuf>, HarvestError> {
    let mut found: Vec<(u64, PathBuf)> = Vec::new();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(dir)
        .map_err(|e| HarvestError::persistence(format!("listing {}", dir.display()), e))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| HarvestError::persistence("reading directory entry", e))?;
        let name = entry.file_name();
        if let Some(seq) = name.to_str().and_then(batch_file_seq) {
            found.push((seq, entry.path()));
        }
    }
    found.sort_by_key(|(seq, _)| *seq);
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Durable staging area for fetched-but-not-yet-batched records.
///
/// Single-writer by construction: the orchestrator owns the store for the
/// whole run, so no locking is needed beyond operation ordering.
pub struct CheckpointStore {
    output_dir: PathBuf,
    wal_path: PathBuf,
    batch_size: usize,
    buffer: VecDeque<ProductRecord>,
    /// Indexed id set mirroring `buffer` for O(1) duplicate checks.
    buffered_ids: HashSet<String>,
    next_batch_seq: u64,
}

impl CheckpointStore {
    /// Open a store over `output_dir`, creating the directory if needed.
    ///
    /// The next batch sequence continues from the highest existing batch
    /// file number, so overlapping or partially deleted histories never
    /// produce colliding names.
    pub fn open(output_dir: &Path, batch_size: usize) -> Result<Self, HarvestError> {
        std::fs::create_dir_all(output_dir).map_err(|e| {
            HarvestError::persistence(format!("creating {}", output_dir.display()), e)
        })?;

        let max_seq = list_batch_files(output_dir)?
            .iter()
            .filter_map(|p| p.file_name()?.to_str().and_then(batch_file_seq))
            .max()
            .unwrap_or(0);

        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            wal_path: output_dir.join(WAL_FILE_NAME),
            batch_size: batch_size.max(1),
            buffer: VecDeque::new(),
            buffered_ids: HashSet::new(),
            next_batch_seq: max_seq + 1,
        })
    }

    /// Reload buffered records left behind by a previous crash.
    ///
    /// Lines that fail to parse are skipped with a warning; entries whose id
    /// is already `completed` (stale leftovers of an interrupted WAL rewrite)
    /// are dropped. Returns the number of recovered records.
    pub fn recover(&mut self, completed: &HashSet<String>) -> Result<usize, HarvestError> {
        if !self.wal_path.exists() {
            return Ok(0);
        }
        let file = File::open(&self.wal_path)
            .map_err(|e| HarvestError::persistence("opening WAL for recovery", e))?;

        let mut recovered = 0;
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| HarvestError::persistence("reading WAL line", e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ProductRecord>(&line) {
                Ok(record) => {
                    if completed.contains(&record.id) {
                        debug!("dropping stale WAL entry for already-batched id {}", record.id);
                        continue;
                    }
                    if self.buffered_ids.insert(record.id.clone()) {
                        self.buffer.push_back(record);
                        recovered += 1;
                    }
                }
                Err(e) => {
                    warn!("⚠️ skipping unparseable WAL line {}: {}", line_no + 1, e);
                }
            }
        }

        if recovered > 0 {
            info!("❤️ RECOVERY: restored {} buffered records from WAL", recovered);
        }
        Ok(recovered)
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Stage one record: WAL append first, then the in-memory buffer.
    ///
    /// Returns `false` (and writes nothing) when a record with the same id
    /// is already buffered, guarding against duplicate fetch results across
    /// overlapping chunks or resumed WAL content.
    pub fn append(&mut self, record: ProductRecord) -> Result<bool, HarvestError> {
        if self.buffered_ids.contains(&record.id) {
            debug!("duplicate fetch result for id {}, ignoring", record.id);
            return Ok(false);
        }

        let line = serde_json::to_string(&record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.wal_path)
            .map_err(|e| HarvestError::persistence("opening WAL for append", e))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.sync_data())
            .map_err(|e| HarvestError::persistence("appending WAL entry", e))?;

        self.buffered_ids.insert(record.id.clone());
        self.buffer.push_back(record);
        Ok(true)
    }

    /// Flush full batches. For each one: drain the oldest `batch_size`
    /// records FIFO, write an immutable batch file, then rewrite the WAL
    /// with whatever remains buffered.
    pub fn checkpoint(&mut self) -> Result<Vec<PathBuf>, HarvestError> {
        let mut written = Vec::new();
        while self.buffer.len() >= self.batch_size {
            let batch: Vec<ProductRecord> = self.buffer.drain(..self.batch_size).collect();
            for record in &batch {
                self.buffered_ids.remove(&record.id);
            }
            let path = self.write_batch(&batch)?;
            self.rewrite_wal()?;
            written.push(path);
        }
        Ok(written)
    }

    /// Flush any remainder (even undersized) as one final batch and leave
    /// the WAL empty. Called on completion, cancellation, and crash paths.
    pub fn force_flush(&mut self) -> Result<Option<PathBuf>, HarvestError> {
        if self.buffer.is_empty() {
            self.rewrite_wal()?;
            return Ok(None);
        }
        let batch: Vec<ProductRecord> = self.buffer.drain(..).collect();
        self.buffered_ids.clear();
        let path = self.write_batch(&batch)?;
        self.rewrite_wal()?;
        info!(
            "💾 GRACEFUL FLUSH: wrote final {} records -> {}",
            batch.len(),
            path.display()
        );
        Ok(Some(path))
    }

    fn write_batch(&mut self, records: &[ProductRecord]) -> Result<PathBuf, HarvestError> {
        let name = format!("products_batch_{:03}.json", self.next_batch_seq);
        let final_path = self.output_dir.join(&name);
        let tmp_path = self.output_dir.join(format!(".{name}.tmp"));

        let body = serde_json::to_vec_pretty(records)?;
        let mut file = File::create(&tmp_path)
            .map_err(|e| HarvestError::persistence("creating batch temp file", e))?;
        file.write_all(&body)
            .and_then(|_| file.sync_all())
            .map_err(|e| HarvestError::persistence("writing batch file", e))?;
        std::fs::rename(&tmp_path, &final_path)
            .map_err(|e| HarvestError::persistence("publishing batch file", e))?;

        info!(
            "💾 saved batch {:03}: {} records -> {}",
            self.next_batch_seq,
            records.len(),
            name
        );
        self.next_batch_seq += 1;
        Ok(final_path)
    }

    /// Rewrite the WAL to contain exactly the current buffer contents.
    fn rewrite_wal(&self) -> Result<(), HarvestError> {
        let tmp_path = self.output_dir.join(format!(".{WAL_FILE_NAME}.tmp"));
        let mut file = File::create(&tmp_path)
            .map_err(|e| HarvestError::persistence("creating WAL rewrite file", e))?;
        for record in &self.buffer {
            let line = serde_json::to_string(record)?;
            file.write_all(line.as_bytes())
                .and_then(|_| file.write_all(b"\n"))
                .map_err(|e| HarvestError::persistence("rewriting WAL", e))?;
        }
        file.sync_all()
            .map_err(|e| HarvestError::persistence("syncing WAL rewrite", e))?;
        std::fs::rename(&tmp_path, &self.wal_path)
            .map_err(|e| HarvestError::persistence("publishing rewritten WAL", e))?;
        Ok(())
    }
}

/// Append-only log of ids that exhausted their retry budget.
pub struct FailedIdLog {
    path: PathBuf,
}

impl FailedIdLog {
    pub fn open(output_dir: &Path) -> Self {
        Self {
            path: output_dir.join(FAILED_LOG_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, id: &str) -> Result<(), HarvestError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| HarvestError::persistence("opening failed-id log", e))?;
        file.write_all(id.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .map_err(|e| HarvestError::persistence("appending failed id", e))?;
        Ok(())
    }
}
