//! End-to-end pipeline tests with a scripted fetcher: batch sizing, failure
//! routing, resume, and cancellation semantics.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use product_harvester::application::{reconcile, CrawlOrchestrator};
use product_harvester::domain::{ProductRecord, ProgressEvent, RunStatus};
use product_harvester::infrastructure::fetcher::ProductFetcher;
use product_harvester::infrastructure::progress::ProgressSink;
use product_harvester::infrastructure::wal::{
    list_batch_files, CheckpointStore, FailedIdLog, FAILED_LOG_NAME, WAL_FILE_NAME,
};

fn record(id: &str) -> ProductRecord {
    ProductRecord::from_response(id, &json!({ "id": id, "name": format!("product {id}") }))
        .unwrap()
}

/// Fetcher with pre-scripted outcomes that records every call. Optionally
/// cancels a token after a fixed number of fetches to simulate an interrupt
/// arriving mid-run.
struct ScriptedFetcher {
    outcomes: HashMap<String, Option<ProductRecord>>,
    calls: Mutex<Vec<String>>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl ScriptedFetcher {
    fn new(outcomes: HashMap<String, Option<ProductRecord>>) -> Self {
        Self {
            outcomes,
            calls: Mutex::new(Vec::new()),
            cancel_after: None,
        }
    }

    fn succeeding(ids: &[&str]) -> Self {
        Self::new(
            ids.iter()
                .map(|id| (id.to_string(), Some(record(id))))
                .collect(),
        )
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProductFetcher for ScriptedFetcher {
    async fn fetch(&self, id: &str) -> Option<ProductRecord> {
        let call_count = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(id.to_string());
            calls.len()
        };
        if let Some((after, token)) = &self.cancel_after {
            if call_count >= *after {
                token.cancel();
            }
        }
        self.outcomes.get(id).cloned().flatten()
    }
}

/// Sink that records every published event.
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn publish(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

fn batch_ids(path: &Path) -> Vec<String> {
    let records: Vec<ProductRecord> =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    records.into_iter().map(|r| r.id).collect()
}

fn orchestrator(
    fetcher: Arc<dyn ProductFetcher>,
    dir: &Path,
    batch_size: usize,
    chunk_size: usize,
    sink: Arc<RecordingSink>,
    cancel: CancellationToken,
) -> CrawlOrchestrator {
    let store = CheckpointStore::open(dir, batch_size).unwrap();
    CrawlOrchestrator::new(
        fetcher,
        store,
        FailedIdLog::open(dir),
        vec![sink],
        chunk_size,
        cancel,
    )
}

fn ids(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn end_to_end_with_one_missing_id() {
    let dir = tempfile::tempdir().unwrap();
    let mut outcomes = HashMap::new();
    outcomes.insert("1".to_string(), Some(record("1")));
    outcomes.insert("2".to_string(), None); // terminal 404
    outcomes.insert("3".to_string(), Some(record("3")));
    let fetcher = Arc::new(ScriptedFetcher::new(outcomes));
    let sink = Arc::new(RecordingSink::default());

    let mut orch = orchestrator(
        fetcher.clone(),
        dir.path(),
        1000,
        100,
        sink.clone(),
        CancellationToken::new(),
    );
    let summary = orch.run(ids(&["1", "2", "3"]), 3, 0).await.unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.batches_written, 1);

    let batches = list_batch_files(dir.path()).unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batch_ids(&batches[0]), vec!["1", "3"]);

    let failed = std::fs::read_to_string(dir.path().join(FAILED_LOG_NAME)).unwrap();
    assert_eq!(failed, "2\n");

    let wal = std::fs::read_to_string(dir.path().join(WAL_FILE_NAME)).unwrap();
    assert!(wal.is_empty());

    let events = sink.events.lock().unwrap();
    assert!(matches!(events.first(), Some(ProgressEvent::RunStarted { .. })));
    assert!(matches!(events.last(), Some(ProgressEvent::RunFinished { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, ProgressEvent::Progress(_))));
}

#[tokio::test]
async fn every_batch_but_the_last_is_exactly_batch_size() {
    let dir = tempfile::tempdir().unwrap();
    let all_ids: Vec<String> = (1..=25).map(|i| i.to_string()).collect();
    let id_refs: Vec<&str> = all_ids.iter().map(String::as_str).collect();
    let fetcher = Arc::new(ScriptedFetcher::succeeding(&id_refs));
    let sink = Arc::new(RecordingSink::default());

    let mut orch = orchestrator(
        fetcher,
        dir.path(),
        10,
        4,
        sink,
        CancellationToken::new(),
    );
    let summary = orch.run(all_ids.clone(), 25, 0).await.unwrap();
    assert_eq!(summary.batches_written, 3);

    let batches = list_batch_files(dir.path()).unwrap();
    let sizes: Vec<usize> = batches.iter().map(|p| batch_ids(p).len()).collect();
    assert_eq!(sizes, vec![10, 10, 5]);

    // No id appears twice across all batch files of the run.
    let mut seen = std::collections::HashSet::new();
    for path in &batches {
        for id in batch_ids(path) {
            assert!(seen.insert(id), "duplicate id persisted");
        }
    }
    assert_eq!(seen.len(), 25);
}

#[tokio::test]
async fn completed_ids_are_never_fetched_again() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("products_batch_001.json"),
        serde_json::to_string(&vec![record("1"), record("2")]).unwrap(),
    )
    .unwrap();

    let report = reconcile(&ids(&["1", "2", "3"]), dir.path());
    assert_eq!(report.pending, ids(&["3"]));

    let fetcher = Arc::new(ScriptedFetcher::succeeding(&["1", "2", "3"]));
    let sink = Arc::new(RecordingSink::default());
    let mut orch = orchestrator(
        fetcher.clone(),
        dir.path(),
        1000,
        100,
        sink,
        CancellationToken::new(),
    );
    orch.run(report.pending, 3, 2).await.unwrap();

    assert_eq!(fetcher.calls(), vec!["3"]);
}

#[tokio::test]
async fn interrupt_flushes_buffered_records_and_stops_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let all_ids: Vec<String> = (1..=10).map(|i| i.to_string()).collect();
    let id_refs: Vec<&str> = all_ids.iter().map(String::as_str).collect();

    let cancel = CancellationToken::new();
    let mut fetcher = ScriptedFetcher::succeeding(&id_refs);
    fetcher.cancel_after = Some((5, cancel.clone()));
    let fetcher = Arc::new(fetcher);
    let sink = Arc::new(RecordingSink::default());

    // batch_size above the buffered count: only the forced flush may write.
    let mut orch = orchestrator(
        fetcher.clone(),
        dir.path(),
        1000,
        5,
        sink.clone(),
        cancel,
    );
    let summary = orch.run(all_ids, 10, 0).await.unwrap();

    assert_eq!(summary.status, RunStatus::Cancelled);
    // The in-flight chunk finished; the next chunk was never dispatched.
    assert_eq!(fetcher.calls().len(), 5);

    let batches = list_batch_files(dir.path()).unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batch_ids(&batches[0]).len(), 5);

    let wal = std::fs::read_to_string(dir.path().join(WAL_FILE_NAME)).unwrap();
    assert!(wal.is_empty());

    let events = sink.events.lock().unwrap();
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::RunInterrupted { .. })
    ));
}

#[tokio::test]
async fn exhausted_id_is_logged_once_and_never_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let mut outcomes = HashMap::new();
    outcomes.insert("7".to_string(), None);
    let fetcher = Arc::new(ScriptedFetcher::new(outcomes));
    let sink = Arc::new(RecordingSink::default());

    let mut orch = orchestrator(
        fetcher,
        dir.path(),
        1000,
        100,
        sink,
        CancellationToken::new(),
    );
    let summary = orch.run(ids(&["7"]), 1, 0).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 0);

    let failed = std::fs::read_to_string(dir.path().join(FAILED_LOG_NAME)).unwrap();
    assert_eq!(failed, "7\n");
    assert!(list_batch_files(dir.path()).unwrap().is_empty());
}
