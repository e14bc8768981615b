use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

use crate::cli::config::{ExportBackend, ExportSettings};
use crate::extract::ItemKey;
use crate::storage::jsonlines::{create_maybe_gzip, MaybeGzWriter};

/// One extracted item as written to the export sink
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportRecord {
    pub url: String,
    pub key: ItemKey,
    pub item: Option<serde_json::Value>,
}

/// Sink for extracted items, deduplicated by item key across all runs
#[async_trait]
pub trait Exporter: Send {
    /// Write a record; returns false if its key was already exported
    async fn export(&mut self, record: &ExportRecord) -> Result<bool>;

    /// Flush and close the sink
    async fn finish(&mut self) -> Result<()>;
}

/// Create the exporter named by the settings
pub async fn create_exporter(settings: &ExportSettings) -> Result<Box<dyn Exporter>> {
    match settings.backend {
        ExportBackend::Jsonlines => Ok(Box::new(JsonLinesExporter::create(&settings.path)?)),
        ExportBackend::Postgresql => Ok(Box::new(PostgresExporter::new(settings).await?)),
    }
}

/// Drain a channel of records into an exporter, returning how many were written
pub async fn run_export(
    mut exporter: Box<dyn Exporter>,
    mut records: UnboundedReceiver<ExportRecord>,
) -> Result<usize> {
    let mut written = 0;

    while let Some(record) = records.recv().await {
        if exporter.export(&record).await? {
            written += 1;
        }
    }

    exporter.finish().await?;
    info!("Exported {} unique items", written);

    Ok(written)
}

/// JSON-lines file exporter
pub struct JsonLinesExporter {
    writer: Option<MaybeGzWriter>,
    exported: HashSet<ItemKey>,
}

impl JsonLinesExporter {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let writer = create_maybe_gzip(path)
            .context(format!("Failed to create export file: {}", path.display()))?;

        debug!("Exporting items to {}", path.display());

        Ok(Self {
            writer: Some(writer),
            exported: HashSet::new(),
        })
    }
}

#[async_trait]
impl Exporter for JsonLinesExporter {
    async fn export(&mut self, record: &ExportRecord) -> Result<bool> {
        if self.exported.contains(&record.key) {
            return Ok(false);
        }

        let writer = self.writer.as_mut()
            .context("Export file already closed")?;

        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;

        self.exported.insert(record.key.clone());
        Ok(true)
    }

    async fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finish().context("Failed to finish export file")?;
        }
        Ok(())
    }
}

/// PostgreSQL exporter; the primary key on `key` does the deduplication
pub struct PostgresExporter {
    pool: Pool<Postgres>,
    schema: String,
    table: String,
}

impl PostgresExporter {
    pub async fn new(settings: &ExportSettings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&settings.connection_string)
            .await
            .context(format!("Failed to connect to PostgreSQL: {}", settings.connection_string))?;

        let exporter = Self {
            pool,
            schema: settings.schema_name.clone(),
            table: settings.table_name.clone(),
        };

        exporter.ensure_table().await?;

        debug!("Connected to PostgreSQL database");

        Ok(exporter)
    }

    async fn ensure_table(&self) -> Result<()> {
        let query = format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema);

        sqlx::query(&query)
            .execute(&self.pool)
            .await
            .context(format!("Failed to create schema: {}", self.schema))?;

        let query = format!(
            "CREATE TABLE IF NOT EXISTS {}.{} (
                key TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                item JSONB,
                exported_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            self.schema, self.table
        );

        sqlx::query(&query)
            .execute(&self.pool)
            .await
            .context(format!("Failed to create table: {}.{}", self.schema, self.table))?;

        debug!("Ensured table exists: {}.{}", self.schema, self.table);

        Ok(())
    }
}

#[async_trait]
impl Exporter for PostgresExporter {
    async fn export(&mut self, record: &ExportRecord) -> Result<bool> {
        let query = format!(
            "INSERT INTO {}.{} (key, url, item) VALUES ($1, $2, $3)
             ON CONFLICT (key) DO NOTHING",
            self.schema, self.table
        );

        let result = sqlx::query(&query)
            .bind(record.key.as_str())
            .bind(&record.url)
            .bind(record.item.clone().map(Json))
            .execute(&self.pool)
            .await
            .context(format!("Failed to export item {}", record.key))?;

        Ok(result.rows_affected() == 1)
    }

    async fn finish(&mut self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::jsonlines::JsonLines;
    use flate2::read::MultiGzDecoder;
    use std::io::Read;
    use serde_json::json;

    fn record(url: &str, key: &str) -> ExportRecord {
        ExportRecord {
            url: url.to_string(),
            key: ItemKey::new(key),
            item: Some(json!(key)),
        }
    }

    #[tokio::test]
    async fn test_items_found_by_several_runs_are_exported_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("items.jl.gz");
        let exporter = JsonLinesExporter::create(&path).unwrap();

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tx.send(record("http://forum/a", "thread:1")).unwrap();
        tx.send(record("http://forum/b", "thread:2")).unwrap();
        // A second run reaching the same item through another page
        tx.send(record("http://forum/c", "thread:1")).unwrap();
        drop(tx);

        let written = run_export(Box::new(exporter), rx).await.unwrap();
        assert_eq!(written, 2);

        let lines: Vec<serde_json::Value> = JsonLines::open(&path).unwrap().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], json!({"url": "http://forum/a", "key": "thread:1", "item": "thread:1"}));
        assert_eq!(lines[1]["key"], "thread:2");
    }

    #[tokio::test]
    async fn test_finished_gzip_export_has_complete_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.jl.gz");
        let mut exporter = JsonLinesExporter::create(&path).unwrap();

        for index in 0..500 {
            exporter.export(&record("http://forum/t", &format!("post:{}", index))).await.unwrap();
        }
        exporter.finish().await.unwrap();

        // A strict decoder fails on a stream without its trailer
        let mut text = String::new();
        MultiGzDecoder::new(std::fs::File::open(&path).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text.lines().count(), 500);

        let closed = exporter.export(&record("http://forum/t", "post:late")).await;
        assert!(closed.is_err());
    }
}
