//! Retrieval coordinator.
//!
//! [`RetrievalEngine`] owns the vector index, the lexical fallback, and the
//! response cache, and orchestrates both directions of data flow:
//!
//! - **Query**: fingerprint → cache check → normalize → embed → index query
//!   (over-fetched) → resolve via the document store → score/rank → cache →
//!   respond. The embedding stage and the index-query/resolve stage each
//!   run under the configured stage budget; a failure or blown budget in
//!   either degrades to lexical matching instead of failing the query, and
//!   only total unavailability produces an empty degraded result.
//! - **Ingestion**: validate → dedup by content hash → store → normalize →
//!   embed → index upsert → `mark_embedded`. Idempotent: re-processing an
//!   unchanged document computes the same vector and the upsert is a no-op
//!   effect-wise.
//!
//! # Ranking
//!
//! Cosine similarity (clamped to `[0, 1]` for display) is the primary rank
//! key. Equal scores break ties by verified flag, then source priority,
//! then recency, then id — fully deterministic. Results below the
//! configured similarity floor are excluded entirely rather than returned
//! as "low" confidence, and the result set is never padded back up to `k`.
//!
//! # Concurrency
//!
//! Queries run read-only against the index and cache with no global lock;
//! writes hold single-key locks; `reindex_all` is the one exclusive-writer
//! operation and runs in a background task. Callers that drop the returned
//! future cancel cooperatively between stages — at most one in-flight
//! embedding call is wasted.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::{self, ResponseCache};
use crate::config::{CacheConfig, Config, RetrievalConfig};
use crate::embedding::TextEmbedder;
use crate::error::RetrievalError;
use crate::index::VectorIndex;
use crate::lexical::LexicalIndex;
use crate::models::{
    Confidence, DegradedReason, Document, HealthReport, IngestOutcome, Language, QaRecord,
    QueryFilters, QueryRequest, RankedMatch, RankedResult, ReindexState, ReindexStatus,
};
use crate::normalize;
use crate::store::DocumentStore;

/// Documents embedded per provider call during a full reindex.
const REINDEX_BATCH: usize = 32;

/// The knowledge retrieval engine.
pub struct RetrievalEngine {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn TextEmbedder>,
    index: VectorIndex,
    lexical: LexicalIndex,
    cache: ResponseCache,
    retrieval: RetrievalConfig,
    /// Whether vectors are persisted through the store for warm starts.
    persist_vectors: bool,
    reindex_status: Mutex<ReindexStatus>,
    reindex_running: AtomicBool,
    /// Handle to ourselves for spawning the background reindex task.
    self_ref: Weak<RetrievalEngine>,
}

impl RetrievalEngine {
    /// Build an engine from its injected collaborators.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn TextEmbedder>,
        retrieval: RetrievalConfig,
        cache_config: CacheConfig,
        persist_vectors: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            store,
            embedder,
            index: VectorIndex::new(),
            lexical: LexicalIndex::new(),
            cache: ResponseCache::new(
                cache_config.capacity,
                Duration::from_secs(cache_config.ttl_secs),
            ),
            retrieval,
            persist_vectors,
            reindex_status: Mutex::new(ReindexStatus::default()),
            reindex_running: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        })
    }

    /// Convenience constructor wiring the SQLite store and the configured
    /// embedding backend, then warm-loading the in-memory structures.
    pub async fn bootstrap(config: &Config) -> anyhow::Result<Arc<Self>> {
        let pool = crate::db::connect(config).await?;
        crate::migrate::apply_schema(&pool).await?;

        let store = Arc::new(crate::store::SqliteStore::new(pool));
        let embedder = Arc::new(crate::embedding::Embedder::from_config(&config.embedding)?);

        let engine = Self::new(
            store,
            embedder,
            config.retrieval.clone(),
            config.cache.clone(),
            config.index.backend == "sqlite",
        );
        engine.warm_start().await?;
        Ok(engine)
    }

    /// Populate the lexical index and (when vectors are persisted) the
    /// vector index from the store. Documents without a current vector stay
    /// pending until the next reindex.
    pub async fn warm_start(&self) -> Result<(), RetrievalError> {
        let docs = self.store.list_all().await?;
        let model = self.embedder.model_id().to_string();

        let mut current: HashSet<String> = HashSet::new();
        for doc in docs.iter().filter(|d| d.active) {
            let normalized = normalize::normalize(&doc.question_text, doc.language);
            self.lexical.insert(&doc.id, &normalize::tokenize(&normalized));
            if doc.is_current(&model) {
                current.insert(doc.id.clone());
            }
        }

        let mut loaded = 0usize;
        if self.persist_vectors {
            for (id, vector) in self.store.load_vectors(&model).await? {
                if current.contains(&id) {
                    self.index.upsert(&id, vector);
                    loaded += 1;
                }
            }
        }

        info!(
            documents = docs.len(),
            vectors = loaded,
            "warm start complete"
        );
        Ok(())
    }

    // ============ Query path ============

    /// Answer a free-text query with ranked, attributed, confidence-scored
    /// matches.
    ///
    /// Never fails: subsystem trouble degrades the result (see the module
    /// docs) and is reported through `degraded`/`degraded_reason`.
    pub async fn retrieve(&self, req: &QueryRequest) -> RankedResult {
        let language = req
            .language
            .unwrap_or_else(|| normalize::detect_language(&req.query));
        let k = if req.k == 0 {
            self.retrieval.default_k
        } else {
            req.k
        };

        let normalized = normalize::normalize(&req.query, language);
        if normalized.is_empty() {
            return RankedResult::empty(&req.query, language);
        }

        let fingerprint = cache::fingerprint(&normalized, language, k, &req.filters);
        if let Some(mut cached) = self.cache.get(&fingerprint) {
            debug!(%fingerprint, "cache hit");
            cached.query = req.query.clone();
            return cached;
        }

        let overfetch = k.saturating_mul(self.retrieval.overfetch_factor).max(k);
        let budget = Duration::from_millis(self.retrieval.stage_timeout_ms);

        let query_vector = match tokio::time::timeout(budget, self.embedder.embed(&normalized)).await
        {
            Ok(Ok(vector)) => Some(vector),
            Ok(Err(e)) => {
                warn!(error = %e, "embedding unavailable, using lexical fallback");
                None
            }
            Err(_) => {
                warn!(
                    budget_ms = self.retrieval.stage_timeout_ms,
                    "embedding stage over budget, using lexical fallback"
                );
                None
            }
        };

        let result = match query_vector {
            Some(vector) => {
                // The index query and document resolution run under the
                // same per-stage budget as embedding.
                match tokio::time::timeout(
                    budget,
                    self.semantic_matches(&vector, language, k, overfetch, &req.filters),
                )
                .await
                {
                    Ok(Ok(matches)) => RankedResult {
                        query: req.query.clone(),
                        language,
                        matches,
                        degraded: false,
                        degraded_reason: None,
                    },
                    Ok(Err(e)) => {
                        warn!(error = %e, "semantic retrieval failed");
                        RankedResult {
                            query: req.query.clone(),
                            language,
                            matches: Vec::new(),
                            degraded: true,
                            degraded_reason: Some(DegradedReason::IndexUnavailable),
                        }
                    }
                    Err(_) => {
                        warn!(
                            budget_ms = self.retrieval.stage_timeout_ms,
                            "index query stage over budget, using lexical fallback"
                        );
                        RankedResult {
                            query: req.query.clone(),
                            language,
                            matches: self
                                .lexical_fallback(&normalized, language, k, overfetch, &req.filters)
                                .await,
                            degraded: true,
                            degraded_reason: Some(DegradedReason::IndexUnavailable),
                        }
                    }
                }
            }
            None => RankedResult {
                query: req.query.clone(),
                language,
                matches: self
                    .lexical_fallback(&normalized, language, k, overfetch, &req.filters)
                    .await,
                degraded: true,
                degraded_reason: Some(DegradedReason::EmbeddingUnavailable),
            },
        };

        // Fire-and-forget cache write; degraded results are not memoized so
        // recovery is visible immediately.
        if !result.degraded {
            self.cache.put(fingerprint, result.clone());
        }

        result
    }

    async fn semantic_matches(
        &self,
        query_vector: &[f32],
        language: Language,
        k: usize,
        overfetch: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<RankedMatch>, RetrievalError> {
        if query_vector.len() != self.embedder.dims() {
            return Err(RetrievalError::IndexUnavailable(format!(
                "query vector has {} dims, model produces {}",
                query_vector.len(),
                self.embedder.dims()
            )));
        }

        let candidates = self.index.query(query_vector, overfetch)?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let similarities: HashMap<String, f32> = candidates.iter().cloned().collect();
        let ids: Vec<String> = candidates.into_iter().map(|(id, _)| id).collect();

        let docs = self.store.get_batch(&ids).await?;
        if docs.len() < ids.len() {
            warn!(
                missing = ids.len() - docs.len(),
                "index holds references to documents missing from the store"
            );
        }

        let model = self.embedder.model_id();
        let mut matches = Vec::new();

        for doc in docs {
            if !doc.active || doc.language != language || !doc.is_current(model) {
                continue;
            }
            if !passes_filters(&doc, filters) {
                continue;
            }

            let raw = similarities.get(&doc.id).copied().unwrap_or(0.0);
            let similarity = (raw as f64).clamp(0.0, 1.0);
            if similarity < self.retrieval.similarity_floor {
                continue;
            }

            let confidence = self.confidence_for(similarity);
            matches.push(RankedMatch {
                document: doc,
                similarity,
                confidence,
            });
        }

        Ok(rank(matches, k))
    }

    /// Run the lexical fallback, absorbing its own failures: fallback
    /// trouble degrades to an empty set, never an error.
    async fn lexical_fallback(
        &self,
        normalized: &str,
        language: Language,
        k: usize,
        overfetch: usize,
        filters: &QueryFilters,
    ) -> Vec<RankedMatch> {
        match self
            .lexical_matches(normalized, language, k, overfetch, filters)
            .await
        {
            Ok(matches) => matches,
            Err(e) => {
                warn!(error = %e, "lexical fallback failed");
                Vec::new()
            }
        }
    }

    async fn lexical_matches(
        &self,
        normalized: &str,
        language: Language,
        k: usize,
        overfetch: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<RankedMatch>, RetrievalError> {
        let tokens = normalize::tokenize(normalized);
        let hits = self.lexical.query(&tokens, overfetch);
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let scores: HashMap<String, f64> = hits.iter().cloned().collect();
        let ids: Vec<String> = hits.into_iter().map(|(id, _)| id).collect();
        let docs = self.store.get_batch(&ids).await?;

        let mut matches = Vec::new();
        for doc in docs {
            if !doc.active || doc.language != language {
                continue;
            }
            if !passes_filters(&doc, filters) {
                continue;
            }

            let similarity = scores.get(&doc.id).copied().unwrap_or(0.0).clamp(0.0, 1.0);
            if similarity < self.retrieval.similarity_floor {
                continue;
            }

            // Fallback results never claim high confidence.
            let confidence = self.confidence_for(similarity).min(Confidence::Medium);
            matches.push(RankedMatch {
                document: doc,
                similarity,
                confidence,
            });
        }

        Ok(rank(matches, k))
    }

    fn confidence_for(&self, similarity: f64) -> Confidence {
        if similarity >= self.retrieval.high_threshold {
            Confidence::High
        } else if similarity >= self.retrieval.medium_threshold {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }

    // ============ Ingestion path ============

    /// Ingest one normalized Q&A record.
    ///
    /// Outcomes are declared, not thrown: a record whose question
    /// normalizes to an already-known content hash is a `Duplicate` (same
    /// answer) or an in-place answer update (`Accepted` with the existing
    /// id); malformed records are `Rejected`. Store failures surface as
    /// errors — ingestion never drops data silently.
    pub async fn ingest(&self, record: &QaRecord) -> Result<IngestOutcome, RetrievalError> {
        if let Err(e) = validate_record(record) {
            return Ok(IngestOutcome::Rejected(e.to_string()));
        }

        let language = record
            .language
            .unwrap_or_else(|| normalize::detect_language(&record.question_text));
        let normalized = normalize::normalize(&record.question_text, language);
        if normalized.is_empty() {
            return Ok(IngestOutcome::Rejected(
                "question normalizes to empty text".to_string(),
            ));
        }

        let hash = normalize::content_hash(&normalized);

        if let Some(existing_id) = self.store.find_by_content_hash(&hash, language).await? {
            let existing = self.store.get(&existing_id).await?;
            if let Some(existing) = existing {
                if existing.answer_text == record.answer_text {
                    debug!(id = %existing_id, "duplicate ingestion");
                    return Ok(IngestOutcome::Duplicate(existing_id));
                }

                // Re-ingestion of an updated answer for a known question.
                let now = chrono::Utc::now().timestamp();
                self.store
                    .update_answer(&existing_id, &record.answer_text, now)
                    .await?;
                self.embed_document(&existing_id, &normalized).await;
                info!(id = %existing_id, "updated answer for existing question");
                return Ok(IngestOutcome::Accepted(existing_id));
            }
        }

        let now = chrono::Utc::now().timestamp();
        let doc = Document {
            id: uuid::Uuid::new_v4().to_string(),
            language,
            question_text: record.question_text.clone(),
            answer_text: record.answer_text.clone(),
            source_name: record.source_name.clone(),
            source_url: record.source_url.clone(),
            verified: record.verified,
            source_priority: record.source_priority,
            content_hash: hash,
            embedding_version: None,
            active: true,
            created_at: now,
            updated_at: now,
        };

        self.store.insert(&doc).await?;
        self.lexical.insert(&doc.id, &normalize::tokenize(&normalized));
        self.embed_document(&doc.id, &normalized).await;

        debug!(id = %doc.id, language = language.as_str(), "document ingested");
        Ok(IngestOutcome::Accepted(doc.id))
    }

    /// Embed and index one document. Failure leaves the document pending
    /// (no `embedding_version`) for the next reindex pass — never fatal.
    async fn embed_document(&self, id: &str, normalized: &str) {
        match self.embedder.embed(normalized).await {
            Ok(vector) => {
                if self.persist_vectors {
                    if let Err(e) = self
                        .store
                        .put_vector(id, self.embedder.model_id(), &vector)
                        .await
                    {
                        warn!(id, error = %e, "failed to persist vector");
                    }
                }
                self.index.upsert(id, vector);
                if let Err(e) = self.store.mark_embedded(id, self.embedder.model_id()).await {
                    warn!(id, error = %e, "failed to record embedding version");
                }
            }
            Err(e) => {
                warn!(id, error = %e, "embedding failed, document pending re-embed");
            }
        }
    }

    // ============ Moderation hooks ============

    /// Apply a verification-status change from the external moderation
    /// process.
    pub async fn set_document_verified(
        &self,
        id: &str,
        verified: bool,
    ) -> Result<(), RetrievalError> {
        let now = chrono::Utc::now().timestamp();
        self.store.set_verified(id, verified, now).await?;
        Ok(())
    }

    /// Activate or deactivate a document. Deactivation removes it from
    /// both in-memory structures but never from the store.
    pub async fn set_document_active(&self, id: &str, active: bool) -> Result<(), RetrievalError> {
        let now = chrono::Utc::now().timestamp();
        self.store.set_active(id, active, now).await?;

        if active {
            if let Some(doc) = self.store.get(id).await? {
                let normalized = normalize::normalize(&doc.question_text, doc.language);
                self.lexical.insert(id, &normalize::tokenize(&normalized));
                self.embed_document(id, &normalized).await;
            }
        } else {
            self.index.remove(id);
            self.lexical.remove(id);
        }
        Ok(())
    }

    // ============ Reindexing ============

    /// Trigger a full re-embed and atomic index rebuild in the background.
    /// Returns immediately; progress is observable via
    /// [`reindex_status`](Self::reindex_status). A no-op when a rebuild is
    /// already in flight.
    pub fn reindex_all(&self) {
        let Some(engine) = self.self_ref.upgrade() else {
            return;
        };

        if self.reindex_running.swap(true, Ordering::SeqCst) {
            debug!("reindex already running");
            return;
        }

        {
            let mut status = self.reindex_status.lock().unwrap();
            *status = ReindexStatus {
                state: ReindexState::Running,
                started_at: Some(chrono::Utc::now().timestamp()),
                finished_at: None,
                documents_embedded: 0,
                last_error: None,
            };
        }

        tokio::spawn(async move {
            let outcome = engine.run_full_reindex().await;
            let mut status = engine.reindex_status.lock().unwrap();
            status.finished_at = Some(chrono::Utc::now().timestamp());
            match outcome {
                Ok(embedded) => {
                    status.state = ReindexState::Completed;
                    status.documents_embedded = embedded;
                }
                Err(e) => {
                    warn!(error = %e, "reindex failed");
                    status.state = ReindexState::Failed;
                    status.last_error = Some(e.to_string());
                }
            }
            engine.reindex_running.store(false, Ordering::SeqCst);
        });
    }

    pub fn reindex_status(&self) -> ReindexStatus {
        self.reindex_status.lock().unwrap().clone()
    }

    /// Re-embed every active document and atomically swap the index.
    /// On failure the previous index keeps serving queries untouched.
    async fn run_full_reindex(&self) -> Result<usize, RetrievalError> {
        let docs = self.store.list_all().await?;
        let active: Vec<&Document> = docs.iter().filter(|d| d.active).collect();
        let model = self.embedder.model_id().to_string();

        info!(documents = active.len(), model = %model, "reindex started");

        let mut pairs: Vec<(String, Vec<f32>)> = Vec::with_capacity(active.len());
        let mut normalized_by_id: HashMap<String, String> = HashMap::with_capacity(active.len());

        for batch in active.chunks(REINDEX_BATCH) {
            let texts: Vec<String> = batch
                .iter()
                .map(|d| {
                    let n = normalize::normalize(&d.question_text, d.language);
                    normalized_by_id.insert(d.id.clone(), n.clone());
                    n
                })
                .collect();

            let vectors = self.embedder.embed_batch(&texts).await?;
            for (doc, vector) in batch.iter().zip(vectors) {
                pairs.push((doc.id.clone(), vector));
            }
        }

        let embedded = pairs.len();

        if self.persist_vectors {
            for (id, vector) in &pairs {
                self.store.put_vector(id, &model, vector).await?;
            }
        }

        self.index.rebuild(pairs);

        self.lexical.clear();
        for doc in &active {
            if let Some(normalized) = normalized_by_id.get(&doc.id) {
                self.lexical.insert(&doc.id, &normalize::tokenize(normalized));
            }
        }

        for doc in &active {
            self.store.mark_embedded(&doc.id, &model).await?;
        }

        // Cached results were ranked against the old index.
        self.cache.clear();

        info!(documents = embedded, "reindex complete");
        Ok(embedded)
    }

    /// Incremental catch-up: re-embed documents changed after `since` and
    /// drop deactivated ones from the in-memory structures. Returns the
    /// number of documents re-embedded.
    pub async fn reindex_changed(&self, since: i64) -> Result<usize, RetrievalError> {
        let changed = self.store.list_changed_since(since).await?;
        let mut embedded = 0usize;

        for doc in changed {
            if !doc.active {
                self.index.remove(&doc.id);
                self.lexical.remove(&doc.id);
                self.store.delete_vector(&doc.id).await?;
                continue;
            }

            let normalized = normalize::normalize(&doc.question_text, doc.language);
            self.lexical.insert(&doc.id, &normalize::tokenize(&normalized));

            let vector = self.embedder.embed(&normalized).await?;
            if self.persist_vectors {
                self.store
                    .put_vector(&doc.id, self.embedder.model_id(), &vector)
                    .await?;
            }
            self.index.upsert(&doc.id, vector);
            self.store
                .mark_embedded(&doc.id, self.embedder.model_id())
                .await?;
            embedded += 1;
        }

        Ok(embedded)
    }

    // ============ Health ============

    pub async fn health(&self) -> Result<HealthReport, RetrievalError> {
        Ok(HealthReport {
            index_size: self.index.len(),
            document_count: self.store.count().await?,
            embedding_version: self.embedder.model_id().to_string(),
            cache_hit_rate: self.cache.hit_rate(),
            last_rebuild_timestamp: self.index.last_rebuild(),
            lexical_terms: self.lexical.term_count(),
        })
    }
}

/// Field-level validation of an ingestion record. A failure rejects the
/// record whole; nothing is partially stored.
fn validate_record(record: &QaRecord) -> Result<(), RetrievalError> {
    if record.question_text.trim().is_empty() {
        return Err(RetrievalError::Validation(
            "empty question_text".to_string(),
        ));
    }
    if record.answer_text.trim().is_empty() {
        return Err(RetrievalError::Validation("empty answer_text".to_string()));
    }
    if record.source_name.trim().is_empty() {
        return Err(RetrievalError::Validation(
            "missing source attribution".to_string(),
        ));
    }
    Ok(())
}

fn passes_filters(doc: &Document, filters: &QueryFilters) -> bool {
    if filters.verified_only && !doc.verified {
        return false;
    }
    if let Some(source) = &filters.source_name {
        if &doc.source_name != source {
            return false;
        }
    }
    true
}

/// Deterministic ranking: similarity desc, then verified, source priority,
/// recency, and finally ascending id.
fn rank(mut matches: Vec<RankedMatch>, k: usize) -> Vec<RankedMatch> {
    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.document.verified.cmp(&a.document.verified))
            .then_with(|| b.document.source_priority.cmp(&a.document.source_priority))
            .then_with(|| b.document.updated_at.cmp(&a.document.updated_at))
            .then_with(|| a.document.id.cmp(&b.document.id))
    });
    matches.truncate(k);
    matches
}
