//! Application layer - reconciliation and run orchestration.

pub mod orchestrator;
pub mod reconciler;

pub use orchestrator::CrawlOrchestrator;
pub use reconciler::{reconcile, scan_completed_ids, ReconcileReport};
