//! Event types emitted by the orchestrator for progress reporting.
//!
//! These are the payloads handed to [`ProgressSink`] implementations; the
//! concrete transport (log line, outbound webhook) lives in the
//! infrastructure layer.
//!
//! [`ProgressSink`]: crate::infrastructure::progress::ProgressSink

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Overall status of a crawl run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Cancelled,
    Crashed,
}

/// Point-in-time progress, computed after each processed chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Ids that have terminated this run, successfully or not.
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// 0.0..=100.0 over the pending set of this run.
    pub percentage: f64,
    /// Successful records per second since run start.
    pub items_per_sec: f64,
    /// Estimated seconds remaining, absent until throughput is measurable.
    pub eta_seconds: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

/// Structured lifecycle events delivered to progress sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProgressEvent {
    RunStarted {
        total: u64,
        completed: u64,
        pending: u64,
    },
    Progress(ProgressSnapshot),
    RunFinished {
        elapsed_seconds: u64,
        succeeded: u64,
        failed: u64,
        batches_written: u64,
    },
    RunInterrupted {
        succeeded: u64,
        failed: u64,
    },
    RunCrashed {
        message: String,
        succeeded: u64,
        failed: u64,
    },
}

/// Final accounting returned by the orchestrator.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub status: RunStatus,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub batches_written: u64,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    pub fn compute(
        processed: u64,
        succeeded: u64,
        failed: u64,
        total_pending: u64,
        elapsed: Duration,
    ) -> Self {
        let percentage = if total_pending == 0 {
            100.0
        } else {
            (processed as f64 / total_pending as f64 * 100.0).min(100.0)
        };
        let items_per_sec = if elapsed.as_secs_f64() > 0.0 {
            succeeded as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let remaining = total_pending.saturating_sub(processed);
        let eta_seconds = if items_per_sec > 0.0 && remaining > 0 {
            Some((remaining as f64 / items_per_sec).round() as u64)
        } else {
            None
        };

        Self {
            processed,
            succeeded,
            failed,
            percentage,
            items_per_sec,
            eta_seconds,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_percentage_and_eta() {
        let snap = ProgressSnapshot::compute(50, 45, 5, 200, Duration::from_secs(10));
        assert!((snap.percentage - 25.0).abs() < f64::EPSILON);
        assert!((snap.items_per_sec - 4.5).abs() < 1e-9);
        // 150 remaining at 4.5/s ~ 33s
        assert_eq!(snap.eta_seconds, Some(33));
    }

    #[test]
    fn snapshot_with_empty_pending_set_is_complete() {
        let snap = ProgressSnapshot::compute(0, 0, 0, 0, Duration::from_secs(1));
        assert_eq!(snap.percentage, 100.0);
        assert_eq!(snap.eta_seconds, None);
    }
}
