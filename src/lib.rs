//! Resumable bulk product harvester.
//!
//! Given a set of product identifiers, fetches one JSON record per id from a
//! remote HTTP API with bounded concurrency and per-id retry budgets,
//! stages successful records in a write-ahead buffer, and checkpoints them
//! into immutable, fixed-size batch files. Interrupted runs resume without
//! re-fetching completed work: batch files are the source of truth for what
//! is done, the WAL for what was fetched but not yet batched.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{reconcile, CrawlOrchestrator, ReconcileReport};
pub use domain::{HarvestError, ProductRecord, ProgressEvent, RunStatus, RunSummary};
pub use infrastructure::{CheckpointStore, FailedIdLog, FetchMode, HarvesterConfig};
