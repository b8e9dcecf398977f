//! Document store adapter.
//!
//! The [`DocumentStore`] trait is the engine's only view of persistent
//! document state, enabling pluggable backends (SQLite for production,
//! in-memory for tests). The adapter is the sole writer of
//! `embedding_version`; the vector index never writes back to the store.
//!
//! Missing ids are never fatal: `get_batch` silently omits them so a stale
//! index entry pointing at a removed document degrades gracefully instead
//! of failing the query.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`insert`](DocumentStore::insert) | Store a new document |
//! | [`get`](DocumentStore::get) / [`get_batch`](DocumentStore::get_batch) | Resolve ids to documents |
//! | [`find_by_content_hash`](DocumentStore::find_by_content_hash) | Dedup lookup |
//! | [`update_answer`](DocumentStore::update_answer) | Re-ingestion of an updated answer |
//! | [`set_verified`](DocumentStore::set_verified) / [`set_active`](DocumentStore::set_active) | Moderation flags |
//! | [`mark_embedded`](DocumentStore::mark_embedded) | Record the embedding version |
//! | [`list_changed_since`](DocumentStore::list_changed_since) | Incremental re-indexing |
//! | [`put_vector`](DocumentStore::put_vector) / [`load_vectors`](DocumentStore::load_vectors) | Vector persistence for warm starts |

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Document, Language};

/// Abstract persistent store for Q&A documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store a new document. The caller has already deduplicated by
    /// content hash.
    async fn insert(&self, doc: &Document) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Document>>;

    /// Resolve a batch of ids. Missing ids are silently omitted; the
    /// returned documents preserve the input order.
    async fn get_batch(&self, ids: &[String]) -> Result<Vec<Document>>;

    /// Dedup lookup: id of the document with this content hash in this
    /// language, if any.
    async fn find_by_content_hash(&self, hash: &str, language: Language)
        -> Result<Option<String>>;

    /// Replace the answer for an existing question. Clears
    /// `embedding_version` so the document reads as stale until
    /// re-embedded.
    async fn update_answer(&self, id: &str, answer_text: &str, updated_at: i64) -> Result<()>;

    async fn set_verified(&self, id: &str, verified: bool, updated_at: i64) -> Result<()>;

    /// Deactivation is a flag, never a delete.
    async fn set_active(&self, id: &str, active: bool, updated_at: i64) -> Result<()>;

    /// Record that the index now holds a vector produced by `version` for
    /// this document.
    async fn mark_embedded(&self, id: &str, version: &str) -> Result<()>;

    /// Documents with `updated_at` strictly after `since`, ordered by id.
    async fn list_changed_since(&self, since: i64) -> Result<Vec<Document>>;

    /// All documents (active and inactive), ordered by id.
    async fn list_all(&self) -> Result<Vec<Document>>;

    async fn count(&self) -> Result<i64>;

    /// Persist the embedding vector for a document (warm-start source).
    async fn put_vector(&self, id: &str, model: &str, vector: &[f32]) -> Result<()>;

    /// Load all persisted vectors produced by `model`.
    async fn load_vectors(&self, model: &str) -> Result<Vec<(String, Vec<f32>)>>;

    async fn delete_vector(&self, id: &str) -> Result<()>;
}
