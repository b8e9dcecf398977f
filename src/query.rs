//! Query command runner.

use anyhow::Result;

use crate::config::Config;
use crate::engine::RetrievalEngine;
use crate::models::{Language, QueryFilters, QueryRequest};

pub async fn run_query(
    config: &Config,
    query: &str,
    language: Option<String>,
    k: Option<usize>,
    verified_only: bool,
    source: Option<String>,
) -> Result<()> {
    let language = match language.as_deref() {
        Some(code) => Some(
            Language::parse(code)
                .ok_or_else(|| anyhow::anyhow!("Unknown language: {}. Use ar or en.", code))?,
        ),
        None => None,
    };

    let engine = RetrievalEngine::bootstrap(config).await?;

    let request = QueryRequest {
        query: query.to_string(),
        language,
        k: k.unwrap_or(0),
        filters: QueryFilters {
            verified_only,
            source_name: source,
        },
    };

    let result = engine.retrieve(&request).await;

    if result.degraded {
        let reason = match result.degraded_reason {
            Some(crate::models::DegradedReason::EmbeddingUnavailable) => "embedding unavailable",
            Some(crate::models::DegradedReason::IndexUnavailable) => "index unavailable",
            None => "unknown",
        };
        println!("(degraded: {})", reason);
    }

    if result.matches.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (rank, m) in result.matches.iter().enumerate() {
        let answer_excerpt: String = m.document.answer_text.chars().take(240).collect();
        println!(
            "{}. [{:.3} {}] {}",
            rank + 1,
            m.similarity,
            m.confidence.label(),
            m.document.question_text
        );
        println!(
            "   source: {}{}",
            m.document.source_name,
            if m.document.verified { " (verified)" } else { "" },
        );
        if let Some(url) = m.document.source_url.as_deref() {
            println!("   url: {}", url);
        }
        println!("   {}", answer_excerpt);
        println!();
    }

    Ok(())
}
