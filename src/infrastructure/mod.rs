//! Infrastructure layer: HTTP fetching, durable storage, external
//! collaborators (input files, progress sinks, merge/ingest), logging, and
//! configuration.

pub mod config;
pub mod fetcher;
pub mod ingest;
pub mod input;
pub mod logging;
pub mod merge;
pub mod progress;
pub mod wal;

pub use config::HarvesterConfig;
pub use fetcher::{FetchMode, FetchPolicy, HttpFetcher, ProductFetcher};
pub use progress::{LogProgressSink, ProgressSink, WebhookProgressSink};
pub use wal::{CheckpointStore, FailedIdLog};
