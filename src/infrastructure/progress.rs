//! Progress sinks: where run lifecycle events go.
//!
//! The orchestrator only knows the [`ProgressSink`] trait; concrete delivery
//! (structured log lines, an outbound webhook) is wired up at startup.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::{ProgressEvent, ProgressSnapshot};

const COLOR_BLUE: u32 = 3_447_003;
const COLOR_GREEN: u32 = 3_066_993;
const COLOR_YELLOW: u32 = 16_776_960;
const COLOR_RED: u32 = 15_158_332;

#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn publish(&self, event: &ProgressEvent);
}

/// Sink that reports through the tracing pipeline.
pub struct LogProgressSink;

#[async_trait]
impl ProgressSink for LogProgressSink {
    async fn publish(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RunStarted {
                total,
                completed,
                pending,
            } => info!(
                "🚀 run started: total={} completed={} pending={}",
                total, completed, pending
            ),
            ProgressEvent::Progress(snap) => info!(
                "📈 {:.0}% | {} ok / {} failed | {:.1} items/s | eta {}",
                snap.percentage,
                snap.succeeded,
                snap.failed,
                snap.items_per_sec,
                snap.eta_seconds
                    .map(|s| format!("{}s", s))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            ProgressEvent::RunFinished {
                elapsed_seconds,
                succeeded,
                failed,
                batches_written,
            } => info!(
                "✅ run finished in {}s: {} ok, {} failed, {} batches",
                elapsed_seconds, succeeded, failed, batches_written
            ),
            ProgressEvent::RunInterrupted { succeeded, failed } => warn!(
                "⚠️ run interrupted: {} ok, {} failed so far",
                succeeded, failed
            ),
            ProgressEvent::RunCrashed {
                message,
                succeeded,
                failed,
            } => warn!(
                "❌ run crashed ({}): {} ok, {} failed so far",
                message, succeeded, failed
            ),
        }
    }
}

/// Sink that POSTs embed-style JSON payloads to a webhook URL.
///
/// Progress updates are throttled to percentage milestones so a long run
/// does not flood the channel; lifecycle events are always delivered.
/// Delivery failures are logged and swallowed: notification must never
/// affect the crawl.
pub struct WebhookProgressSink {
    client: Client,
    url: String,
    notify_every_percent: i64,
    last_notified_percent: AtomicI64,
}

impl WebhookProgressSink {
    pub fn new(url: String, notify_every_percent: u8) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            url,
            notify_every_percent: notify_every_percent.max(1) as i64,
            last_notified_percent: AtomicI64::new(-1),
        }
    }

    fn progress_bar(percentage: f64) -> String {
        let filled = (percentage / 5.0).floor() as usize;
        let filled = filled.min(20);
        format!("{}{}", "▓".repeat(filled), "░".repeat(20 - filled))
    }

    /// Build the embed payload for an event. Pure, so it can be tested
    /// without a live endpoint.
    pub fn embed_for_event(event: &ProgressEvent) -> Value {
        let embed = match event {
            ProgressEvent::RunStarted {
                total,
                completed,
                pending,
            } => json!({
                "title": "🚀 HARVESTER: STARTED",
                "color": COLOR_BLUE,
                "fields": [
                    { "name": "📦 Total input", "value": total.to_string(), "inline": true },
                    { "name": "✅ Done", "value": completed.to_string(), "inline": true },
                    { "name": "⏳ Pending", "value": pending.to_string(), "inline": true },
                ],
            }),
            ProgressEvent::Progress(snap) => Self::progress_embed(snap),
            ProgressEvent::RunFinished {
                elapsed_seconds,
                succeeded,
                failed,
                batches_written,
            } => json!({
                "title": "✅ HARVESTER: FINISHED",
                "color": COLOR_GREEN,
                "fields": [
                    { "name": "⏱️ Elapsed", "value": format!("{:.1} min", *elapsed_seconds as f64 / 60.0), "inline": true },
                    { "name": "📦 Fetched", "value": succeeded.to_string(), "inline": true },
                    { "name": "❌ Failed", "value": failed.to_string(), "inline": true },
                    { "name": "💾 Batches", "value": batches_written.to_string(), "inline": true },
                ],
            }),
            ProgressEvent::RunInterrupted { succeeded, failed } => json!({
                "title": "⚠️ HARVESTER: STOPPED",
                "description": "Run was interrupted; buffered records were flushed.",
                "color": COLOR_YELLOW,
                "fields": [
                    { "name": "✅ Fetched", "value": succeeded.to_string(), "inline": true },
                    { "name": "❌ Failed", "value": failed.to_string(), "inline": true },
                ],
            }),
            ProgressEvent::RunCrashed {
                message,
                succeeded,
                failed,
            } => json!({
                "title": "❌ HARVESTER: CRASHED",
                "description": message,
                "color": COLOR_RED,
                "fields": [
                    { "name": "✅ Fetched", "value": succeeded.to_string(), "inline": true },
                    { "name": "❌ Failed", "value": failed.to_string(), "inline": true },
                ],
            }),
        };
        json!({ "embeds": [embed] })
    }

    fn progress_embed(snap: &ProgressSnapshot) -> Value {
        let pct = snap.percentage.floor() as i64;
        json!({
            "title": format!("📊 PROGRESS: {}%", pct),
            "color": COLOR_BLUE,
            "fields": [
                {
                    "name": "📈 Progress",
                    "value": format!("`[{}]` **{}%**", Self::progress_bar(snap.percentage), pct),
                    "inline": false,
                },
                { "name": "⚡ Speed", "value": format!("{:.1} item/s", snap.items_per_sec), "inline": true },
                {
                    "name": "⏱️ ETA",
                    "value": snap.eta_seconds
                        .map(|s| format!("~ {:.1} min", s as f64 / 60.0))
                        .unwrap_or_else(|| "estimating...".to_string()),
                    "inline": true,
                },
                { "name": "✅ OK", "value": snap.succeeded.to_string(), "inline": true },
                { "name": "❌ Failed", "value": snap.failed.to_string(), "inline": true },
            ],
        })
    }

    fn should_notify(&self, event: &ProgressEvent) -> bool {
        match event {
            ProgressEvent::Progress(snap) => {
                let pct = snap.percentage.floor() as i64;
                let last = self.last_notified_percent.load(Ordering::Relaxed);
                if last < 0 || pct >= last + self.notify_every_percent {
                    self.last_notified_percent.store(pct, Ordering::Relaxed);
                    true
                } else {
                    false
                }
            }
            _ => true,
        }
    }
}

#[async_trait]
impl ProgressSink for WebhookProgressSink {
    async fn publish(&self, event: &ProgressEvent) {
        if !self.should_notify(event) {
            return;
        }
        let payload = Self::embed_for_event(event);
        if let Err(e) = self.client.post(&self.url).json(&payload).send().await {
            warn!("⚠️ webhook delivery failed: {}", e);
        }
    }
}
