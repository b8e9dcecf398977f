//! Core data models used throughout Minbar.
//!
//! These types represent the Q&A documents, ingestion records, and ranked
//! results that flow through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};

/// Language of a document or query. Queries only match documents in the
/// same language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "ar")]
    Ar,
    #[serde(rename = "en")]
    En,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Ar => "ar",
            Language::En => "en",
        }
    }

    pub fn parse(s: &str) -> Option<Language> {
        match s {
            "ar" => Some(Language::Ar),
            "en" => Some(Language::En),
            _ => None,
        }
    }
}

/// A stored Q&A document — the atomic retrievable unit.
///
/// `question_text` and `answer_text` keep the pre-normalization form for
/// display; the normalized form is derived on demand, never stored as the
/// source of truth. `content_hash` is the SHA-256 of the normalized
/// question text and is the dedup key. `embedding_version` names the model
/// that produced the vector currently held by the index for this document;
/// a mismatch with the active model marks the document stale until it is
/// re-embedded.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub language: Language,
    pub question_text: String,
    pub answer_text: String,
    /// Attribution. Always present: confidence is never reported without it.
    pub source_name: String,
    pub source_url: Option<String>,
    /// Set by the external moderation process.
    pub verified: bool,
    /// Relative reliability of the originating authority; higher wins ties.
    pub source_priority: i64,
    pub content_hash: String,
    pub embedding_version: Option<String>,
    /// Deactivation is a flag, never removal — the vector index must never
    /// reference a nonexistent document.
    pub active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Document {
    /// True when the stored vector was produced by `current_version`.
    pub fn is_current(&self, current_version: &str) -> bool {
        self.embedding_version.as_deref() == Some(current_version)
    }
}

/// A normalized Q&A record as produced by the scraping/ingestion pipeline.
///
/// This is the ingestion input contract: the engine never fetches or parses
/// raw web content itself.
#[derive(Debug, Clone, Deserialize)]
pub struct QaRecord {
    pub question_text: String,
    pub answer_text: String,
    /// Omitted ⇒ detected from the question text.
    #[serde(default)]
    pub language: Option<Language>,
    pub source_name: String,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub source_priority: i64,
}

/// Outcome of an ingestion attempt. Duplicates and rejections are declared
/// outcomes, surfaced synchronously — never silently dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted(String),
    Duplicate(String),
    Rejected(String),
}

/// Discrete confidence bucket derived from the similarity score.
/// Display-only; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn label(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

/// Why a response was produced by fallback logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    EmbeddingUnavailable,
    IndexUnavailable,
}

/// One ranked match: document, display similarity in `[0, 1]`, and the
/// derived confidence label.
#[derive(Debug, Clone, Serialize)]
pub struct RankedMatch {
    pub document: Document,
    pub similarity: f64,
    pub confidence: Confidence,
}

/// Ordered result set for one query. Ephemeral — cached briefly, never
/// persisted. `degraded` marks results produced by the lexical fallback
/// (or an empty set when no fallback was available).
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub query: String,
    pub language: Language,
    pub matches: Vec<RankedMatch>,
    pub degraded: bool,
    pub degraded_reason: Option<DegradedReason>,
}

impl RankedResult {
    pub fn empty(query: &str, language: Language) -> Self {
        Self {
            query: query.to_string(),
            language,
            matches: Vec::new(),
            degraded: false,
            degraded_reason: None,
        }
    }
}

/// Optional query-time filters. Part of the cache fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilters {
    pub verified_only: bool,
    pub source_name: Option<String>,
}

/// A retrieval request.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query: String,
    /// Omitted ⇒ detected from the query text.
    pub language: Option<Language>,
    pub k: usize,
    pub filters: QueryFilters,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, k: usize) -> Self {
        Self {
            query: query.into(),
            language: None,
            k,
            filters: QueryFilters::default(),
        }
    }
}

/// Engine health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub index_size: usize,
    pub document_count: i64,
    pub embedding_version: String,
    pub cache_hit_rate: f64,
    pub last_rebuild_timestamp: Option<i64>,
    pub lexical_terms: usize,
}

/// State of the background reindex task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReindexState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Observable status of `reindex_all`.
#[derive(Debug, Clone, Serialize)]
pub struct ReindexStatus {
    pub state: ReindexState,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub documents_embedded: usize,
    pub last_error: Option<String>,
}

impl Default for ReindexStatus {
    fn default() -> Self {
        Self {
            state: ReindexState::Idle,
            started_at: None,
            finished_at: None,
            documents_embedded: 0,
            last_error: None,
        }
    }
}
