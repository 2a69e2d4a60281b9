//! Configuration loading and defaults.
//!
//! Settings are layered: built-in defaults, an optional `harvester.toml`
//! next to the working directory, then `HARVESTER_*` environment overrides
//! (e.g. `HARVESTER_CRAWL__BATCH_SIZE=500`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarvesterConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
}

/// Remote API endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Templated URL; the product id is appended directly.
    pub base_url: String,
    pub user_agent: String,
    pub referer: String,
    /// Wall-clock timeout per request, separate from retry backoff delays.
    pub request_timeout_secs: u64,
}

/// Crawl pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Records per batch file.
    pub batch_size: usize,
    /// Ids dispatched per orchestrator chunk.
    pub chunk_size: usize,
    /// Retry budget per id.
    pub max_attempts: u32,
    /// First-pass fetch settings.
    pub normal: ModeConfig,
    /// Settings used when re-fetching previously failed ids.
    pub careful: ModeConfig,
}

/// Concurrency and backoff settings for one fetch mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeConfig {
    pub max_concurrent: usize,
    pub base_delay_ms: u64,
    /// Fixed delay applied before every request attempt (0 = none).
    pub pacing_delay_ms: u64,
}

/// Outbound progress webhook. Disabled unless a URL is configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: Option<String>,
    /// Progress updates are sent at most once per this many percent.
    pub notify_every_percent: u8,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.tiki.vn/product-detail/api/v1/products/".to_string(),
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            referer: "https://tiki.vn/".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            chunk_size: 100,
            max_attempts: 3,
            normal: ModeConfig {
                max_concurrent: 20,
                base_delay_ms: 1000,
                pacing_delay_ms: 0,
            },
            careful: ModeConfig {
                max_concurrent: 10,
                base_delay_ms: 1000,
                pacing_delay_ms: 50,
            },
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            notify_every_percent: 1,
        }
    }
}

impl HarvesterConfig {
    /// Load configuration from file + environment, falling back to defaults.
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("harvester").required(false))
            .add_source(
                config::Environment::with_prefix("HARVESTER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to assemble configuration sources")?;

        settings
            .try_deserialize()
            .context("failed to deserialize harvester configuration")
    }
}
