//! Downstream ingestion of completed batch files into a relational store.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::{info, warn};

use crate::domain::{HarvestError, ProductRecord};
use crate::infrastructure::wal::list_batch_files;

const CREATE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS products (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    url_key     TEXT NOT NULL,
    price       INTEGER NOT NULL,
    description TEXT NOT NULL,
    images_url  TEXT NOT NULL,
    crawled_at  TIMESTAMP DEFAULT CURRENT_TIMESTAMP
)";

const UPSERT: &str = "
INSERT INTO products (id, name, url_key, price, description, images_url)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT(id) DO UPDATE SET
    name = excluded.name,
    url_key = excluded.url_key,
    price = excluded.price,
    description = excluded.description,
    images_url = excluded.images_url,
    crawled_at = CURRENT_TIMESTAMP";

/// Load every parseable batch file in `data_dir` into the database behind
/// `database_url`, upserting by id. Returns the number of ingested records.
pub async fn ingest_batches(data_dir: &Path, database_url: &str) -> Result<u64, HarvestError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(database_url)
        .await?;
    ingest_into_pool(data_dir, &pool).await
}

pub async fn ingest_into_pool(data_dir: &Path, pool: &SqlitePool) -> Result<u64, HarvestError> {
    sqlx::query(CREATE_TABLE).execute(pool).await?;

    let mut ingested = 0u64;
    for path in list_batch_files(data_dir)? {
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("⚠️ skipping unreadable file {}: {}", path.display(), e);
                continue;
            }
        };
        let records: Vec<ProductRecord> = match serde_json::from_str(&contents) {
            Ok(records) => records,
            Err(e) => {
                warn!("⚠️ skipping corrupt file {}: {}", path.display(), e);
                continue;
            }
        };

        let mut tx = pool.begin().await?;
        for record in &records {
            sqlx::query(UPSERT)
                .bind(&record.id)
                .bind(&record.name)
                .bind(&record.url_key)
                .bind(record.price as i64)
                .bind(&record.description)
                .bind(&record.images_url)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        ingested += records.len() as u64;
        info!("✅ ingested {} records from {}", records.len(), path.display());
    }

    Ok(ingested)
}
