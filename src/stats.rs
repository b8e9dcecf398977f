//! Database statistics and health overview.
//!
//! Summarizes what's indexed: document counts, embedding coverage, and
//! per-language/per-source breakdowns. Used by `minbar stats` to give
//! confidence that ingestion and embedding are working as expected.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

struct SourceStats {
    source: String,
    doc_count: i64,
    verified_count: i64,
    embedded_count: i64,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await?;

    let active_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE active = 1")
        .fetch_one(&pool)
        .await?;

    let embedded_docs: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE embedding_version IS NOT NULL")
            .fetch_one(&pool)
            .await?;

    let stored_vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_vectors")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Minbar — Knowledge Base Stats");
    println!("=============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {} ({} active)", total_docs, active_docs);
    println!(
        "  Embedded:    {} / {} ({}%)",
        embedded_docs,
        total_docs,
        if total_docs > 0 {
            (embedded_docs * 100) / total_docs
        } else {
            0
        }
    );
    println!("  Vectors:     {}", stored_vectors);

    // Per-language breakdown
    let language_rows = sqlx::query(
        "SELECT language, COUNT(*) AS doc_count FROM documents GROUP BY language ORDER BY doc_count DESC",
    )
    .fetch_all(&pool)
    .await?;

    if !language_rows.is_empty() {
        println!();
        println!("  By language:");
        for row in &language_rows {
            let language: String = row.get("language");
            let count: i64 = row.get("doc_count");
            println!("    {:<4} {:>6}", language, count);
        }
    }

    // Per-source breakdown
    let source_rows = sqlx::query(
        r#"
        SELECT
            source_name,
            COUNT(*) AS doc_count,
            SUM(verified) AS verified_count,
            SUM(CASE WHEN embedding_version IS NOT NULL THEN 1 ELSE 0 END) AS embedded_count
        FROM documents
        GROUP BY source_name
        ORDER BY doc_count DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let source_stats: Vec<SourceStats> = source_rows
        .iter()
        .map(|row| SourceStats {
            source: row.get("source_name"),
            doc_count: row.get("doc_count"),
            verified_count: row.get::<Option<i64>, _>("verified_count").unwrap_or(0),
            embedded_count: row.get("embedded_count"),
        })
        .collect();

    if !source_stats.is_empty() {
        println!();
        println!("  By source:");
        println!(
            "  {:<28} {:>6} {:>10} {:>10}",
            "SOURCE", "DOCS", "VERIFIED", "EMBEDDED"
        );
        println!("  {}", "-".repeat(58));

        for s in &source_stats {
            println!(
                "  {:<28} {:>6} {:>10} {:>10}",
                s.source, s.doc_count, s.verified_count, s.embedded_count
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
