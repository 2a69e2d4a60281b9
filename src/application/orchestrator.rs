//! Crawl orchestrator: drives pending ids through fetch, WAL staging, and
//! batch checkpointing, with a guaranteed flush on every exit path.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::{HarvestError, ProgressEvent, ProgressSnapshot, RunStatus, RunSummary};
use crate::infrastructure::fetcher::ProductFetcher;
use crate::infrastructure::progress::ProgressSink;
use crate::infrastructure::wal::{CheckpointStore, FailedIdLog};

/// Mutable per-run counters.
#[derive(Default)]
struct RunCounters {
    processed: u64,
    succeeded: u64,
    failed: u64,
    batches_written: u64,
}

/// Owns the buffer, the id-chunk iteration, and all store mutation for one
/// run. Fetches fan out under the fetcher's admission gate; everything else
/// happens on this single control flow.
pub struct CrawlOrchestrator {
    fetcher: Arc<dyn ProductFetcher>,
    store: CheckpointStore,
    failed_log: FailedIdLog,
    sinks: Vec<Arc<dyn ProgressSink>>,
    chunk_size: usize,
    cancel: CancellationToken,
}

impl CrawlOrchestrator {
    pub fn new(
        fetcher: Arc<dyn ProductFetcher>,
        store: CheckpointStore,
        failed_log: FailedIdLog,
        sinks: Vec<Arc<dyn ProgressSink>>,
        chunk_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            store,
            failed_log,
            sinks,
            chunk_size: chunk_size.max(1),
            cancel,
        }
    }

    /// Run the crawl over `pending`, reporting against `total`/`completed`
    /// corpus counts from reconciliation.
    ///
    /// On cancellation the in-flight chunk is allowed to finish, then the
    /// buffer is force-flushed. On an unhandled error the buffer is
    /// force-flushed (best effort) before the error propagates. In both
    /// cases no successfully fetched record is silently dropped.
    pub async fn run(
        &mut self,
        pending: Vec<String>,
        total: u64,
        completed: u64,
    ) -> Result<RunSummary, HarvestError> {
        let started = Instant::now();
        let mut counters = RunCounters::default();

        self.emit(ProgressEvent::RunStarted {
            total,
            completed,
            pending: pending.len() as u64,
        })
        .await;
        info!("🚀 crawl started: {} pending ids", pending.len());

        let outcome = self.drive(&pending, &mut counters, started).await;

        match outcome {
            Ok(cancelled) => {
                if self.store.force_flush()?.is_some() {
                    counters.batches_written += 1;
                }
                let status = if cancelled {
                    warn!("⚠️ run interrupted; buffered records were flushed");
                    self.emit(ProgressEvent::RunInterrupted {
                        succeeded: counters.succeeded,
                        failed: counters.failed,
                    })
                    .await;
                    RunStatus::Cancelled
                } else {
                    info!(
                        "🎉 run complete: {} fetched, {} failed, {} batches",
                        counters.succeeded, counters.failed, counters.batches_written
                    );
                    self.emit(ProgressEvent::RunFinished {
                        elapsed_seconds: started.elapsed().as_secs(),
                        succeeded: counters.succeeded,
                        failed: counters.failed,
                        batches_written: counters.batches_written,
                    })
                    .await;
                    RunStatus::Completed
                };
                Ok(RunSummary {
                    status,
                    processed: counters.processed,
                    succeeded: counters.succeeded,
                    failed: counters.failed,
                    batches_written: counters.batches_written,
                    elapsed: started.elapsed(),
                })
            }
            Err(e) => {
                error!("❌ crawl loop failed: {}", e);
                // Best-effort flush; the original error is the one that matters.
                if let Err(flush_err) = self.store.force_flush() {
                    error!("❌ flush after failure also failed: {}", flush_err);
                }
                self.emit(ProgressEvent::RunCrashed {
                    message: e.to_string(),
                    succeeded: counters.succeeded,
                    failed: counters.failed,
                })
                .await;
                Err(e)
            }
        }
    }

    /// Chunked fetch loop. Returns `Ok(true)` when stopped by cancellation.
    async fn drive(
        &mut self,
        pending: &[String],
        counters: &mut RunCounters,
        started: Instant,
    ) -> Result<bool, HarvestError> {
        let total_pending = pending.len() as u64;

        for chunk in pending.chunks(self.chunk_size) {
            if self.cancel.is_cancelled() {
                warn!("🛑 cancellation requested, stopping before next chunk");
                return Ok(true);
            }

            info!(
                "dispatching {} ids ({}/{} processed so far)",
                chunk.len(),
                counters.processed,
                total_pending
            );

            // A chunk is not done until every id in it has terminated.
            let fetches = chunk.iter().map(|id| {
                let fetcher = Arc::clone(&self.fetcher);
                let id = id.clone();
                async move {
                    let result = fetcher.fetch(&id).await;
                    (id, result)
                }
            });
            let results = join_all(fetches).await;

            for (id, result) in results {
                match result {
                    Some(record) => {
                        if self.store.append(record)? {
                            counters.succeeded += 1;
                        }
                    }
                    None => {
                        self.failed_log.append(&id)?;
                        counters.failed += 1;
                    }
                }
                counters.processed += 1;
            }

            counters.batches_written += self.store.checkpoint()?.len() as u64;

            let snapshot = ProgressSnapshot::compute(
                counters.processed,
                counters.succeeded,
                counters.failed,
                total_pending,
                started.elapsed(),
            );
            self.emit(ProgressEvent::Progress(snapshot)).await;
        }

        Ok(false)
    }

    async fn emit(&self, event: ProgressEvent) {
        for sink in &self.sinks {
            sink.publish(&event).await;
        }
    }
}
