//! Retrieval error taxonomy.
//!
//! Only failures that a caller can act on are typed here. A stale index
//! reference (document missing from the store) is deliberately *not* an
//! error: it is filtered out of results and logged. Duplicate and rejected
//! ingestions are declared outcomes ([`crate::models::IngestOutcome`]),
//! not errors.

use thiserror::Error;

/// Failures surfaced by the retrieval engine.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The embedding backend is down or timed out. Retryable; queries
    /// degrade to the lexical fallback instead of failing.
    #[error("embedding backend unavailable: {0}")]
    ModelUnavailable(String),

    /// The vector index cannot serve this query (e.g. dimensionality
    /// mismatch after a model change). Reported as a degraded response
    /// with an empty ranked set.
    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),

    /// Malformed document at ingestion. The document is rejected whole,
    /// never partially stored.
    #[error("invalid document: {0}")]
    Validation(String),

    /// Document store I/O failure.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
