//! Ingestion and reindex command runners.
//!
//! `run_ingest` feeds a JSONL file of normalized Q&A records (the output
//! contract of the external scraping pipeline) through the engine, one
//! record per line. `run_reindex` triggers a full re-embed and waits for
//! the background rebuild to finish.

use anyhow::{Context, Result};
use std::io::BufRead;
use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::engine::RetrievalEngine;
use crate::models::{IngestOutcome, QaRecord, ReindexState};

pub async fn run_ingest(config: &Config, path: &Path) -> Result<()> {
    let engine = RetrievalEngine::bootstrap(config).await?;

    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open ingest file: {}", path.display()))?;
    let reader = std::io::BufReader::new(file);

    let mut total = 0u64;
    let mut accepted = 0u64;
    let mut duplicates = 0u64;
    let mut rejected = 0u64;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        total += 1;

        let record: QaRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(line = line_no + 1, error = %e, "skipping malformed record");
                rejected += 1;
                continue;
            }
        };

        match engine.ingest(&record).await? {
            IngestOutcome::Accepted(_) => accepted += 1,
            IngestOutcome::Duplicate(_) => duplicates += 1,
            IngestOutcome::Rejected(reason) => {
                tracing::warn!(line = line_no + 1, %reason, "record rejected");
                rejected += 1;
            }
        }
    }

    println!("ingest {}", path.display());
    println!("  records: {}", total);
    println!("  accepted: {}", accepted);
    println!("  duplicates: {}", duplicates);
    println!("  rejected: {}", rejected);
    println!("ok");

    Ok(())
}

pub async fn run_reindex(config: &Config) -> Result<()> {
    let engine = RetrievalEngine::bootstrap(config).await?;

    engine.reindex_all();

    loop {
        let status = engine.reindex_status();
        match status.state {
            ReindexState::Running => tokio::time::sleep(Duration::from_millis(200)).await,
            ReindexState::Completed => {
                println!("reindex");
                println!("  documents embedded: {}", status.documents_embedded);
                println!("ok");
                return Ok(());
            }
            ReindexState::Failed => {
                anyhow::bail!(
                    "reindex failed: {}",
                    status.last_error.unwrap_or_else(|| "unknown".to_string())
                );
            }
            ReindexState::Idle => {
                // Another caller finished a rebuild we never started.
                anyhow::bail!("reindex did not start");
            }
        }
    }
}
