//! Error taxonomy for the harvest pipeline.
//!
//! Per-id fetch failures are *not* errors: they are absorbed by the fetcher
//! and routed to the failed-id log. Only input-stage problems and persistence
//! failures (which break the durability contract) surface as `HarvestError`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("input error: {0}")]
    Input(String),

    /// A WAL, batch file, or failed-id log write failed. Fatal: continuing
    /// would silently drop fetched records.
    #[error("persistence failure while {context}: {source}")]
    Persistence {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl HarvestError {
    /// Shorthand for wrapping an I/O error with the operation that failed.
    pub fn persistence(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Persistence {
            context: context.into(),
            source,
        }
    }
}
