//! Domain module - Core records, run events, and the error taxonomy
//!
//! Everything in this layer is plain data: no I/O, no async, no clients.

pub mod error;
pub mod events;
pub mod product;

pub use error::HarvestError;
pub use events::{ProgressEvent, ProgressSnapshot, RunStatus, RunSummary};
pub use product::ProductRecord;
