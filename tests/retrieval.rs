//! Engine-level tests over the in-memory store and a deterministic
//! test embedder.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use minbar::config::{CacheConfig, RetrievalConfig};
use minbar::embedding::TextEmbedder;
use minbar::engine::RetrievalEngine;
use minbar::error::RetrievalError;
use minbar::models::{
    Confidence, DegradedReason, IngestOutcome, Language, QaRecord, QueryFilters, QueryRequest,
    ReindexState,
};
use minbar::store::{DocumentStore, MemoryStore};

const DIMS: usize = 256;

const STOPWORDS: &[&str] = &[
    "what", "are", "the", "of", "a", "an", "is", "how", "many", "there", "to", "in",
];

/// Deterministic bag-of-words embedder: every distinct non-stopword token
/// gets its own dimension, so paraphrases sharing tokens score high and
/// unrelated questions score zero. Same text always yields the same vector.
struct BagEmbedder {
    token_dims: Mutex<HashMap<String, usize>>,
    fail: AtomicBool,
    calls: AtomicU64,
}

impl BagEmbedder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            token_dims: Mutex::new(HashMap::new()),
            fail: AtomicBool::new(false),
            calls: AtomicU64::new(0),
        })
    }

    fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut dims = self.token_dims.lock().unwrap();
        let mut vector = vec![0.0f32; DIMS];

        for token in text
            .split_whitespace()
            .filter(|t| !STOPWORDS.contains(t))
        {
            let next = dims.len();
            let dim = *dims.entry(token.to_string()).or_insert(next);
            vector[dim % DIMS] += 1.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait::async_trait]
impl TextEmbedder for BagEmbedder {
    fn model_id(&self) -> &str {
        "test-bag-v1"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RetrievalError::ModelUnavailable("model offline".to_string()));
        }
        self.calls.fetch_add(texts.len() as u64, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }
}

fn test_engine(
    embedder: Arc<BagEmbedder>,
    cache_ttl_secs: u64,
) -> (Arc<RetrievalEngine>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = RetrievalEngine::new(
        store.clone(),
        embedder,
        RetrievalConfig::default(),
        CacheConfig {
            ttl_secs: cache_ttl_secs,
            capacity: 64,
        },
        false,
    );
    (engine, store)
}

fn record(question: &str, answer: &str, source: &str) -> QaRecord {
    QaRecord {
        question_text: question.to_string(),
        answer_text: answer.to_string(),
        language: Some(Language::En),
        source_name: source.to_string(),
        source_url: None,
        verified: false,
        source_priority: 0,
    }
}

async fn ingest_ok(engine: &RetrievalEngine, rec: &QaRecord) -> String {
    match engine.ingest(rec).await.unwrap() {
        IngestOutcome::Accepted(id) => id,
        other => panic!("expected Accepted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_pillars_paraphrase_scores_high() {
    let embedder = BagEmbedder::new();
    let (engine, _store) = test_engine(embedder, 60);

    let q1 = ingest_ok(
        &engine,
        &record(
            "What are the pillars of Islam?",
            "The five pillars are the declaration of faith, prayer, almsgiving, fasting, and pilgrimage.",
            "IslamQA",
        ),
    )
    .await;
    ingest_ok(
        &engine,
        &record(
            "How many daily prayers are there?",
            "There are five daily prayers.",
            "IslamQA",
        ),
    )
    .await;

    let result = engine
        .retrieve(&QueryRequest::new("five pillars of islam", 1))
        .await;

    assert!(!result.degraded);
    assert_eq!(result.matches.len(), 1);
    assert_eq!(result.matches[0].document.id, q1);
    assert!(result.matches[0].similarity >= 0.80);
    assert_eq!(result.matches[0].confidence, Confidence::High);
    assert_eq!(result.matches[0].document.source_name, "IslamQA");
}

#[tokio::test]
async fn test_empty_index_returns_empty_not_error() {
    let embedder = BagEmbedder::new();
    let (engine, _store) = test_engine(embedder, 60);

    let result = engine.retrieve(&QueryRequest::new("anything at all", 5)).await;
    assert!(result.matches.is_empty());
    assert!(!result.degraded);
}

#[tokio::test]
async fn test_empty_query_returns_empty() {
    let embedder = BagEmbedder::new();
    let (engine, _store) = test_engine(embedder, 60);

    let result = engine.retrieve(&QueryRequest::new("  ?! ", 5)).await;
    assert!(result.matches.is_empty());
}

#[tokio::test]
async fn test_retrieval_is_deterministic_across_ties() {
    let embedder = BagEmbedder::new();
    let (engine, _store) = test_engine(embedder, 0);

    // Both questions normalize to the single token "riba" after stopword
    // handling in the test embedder, so they tie at similarity 1.0.
    let mut verified = record("What is riba?", "Riba is usury.", "Dar al-Ifta");
    verified.verified = true;
    let verified_id = ingest_ok(&engine, &verified).await;
    ingest_ok(
        &engine,
        &record("How is riba?", "Riba means interest.", "IslamQA"),
    )
    .await;

    let request = QueryRequest::new("riba", 2);
    let first = engine.retrieve(&request).await;
    let second = engine.retrieve(&request).await;

    assert_eq!(first.matches.len(), 2);
    // Verified document wins the tie.
    assert_eq!(first.matches[0].document.id, verified_id);

    let first_ids: Vec<&str> = first.matches.iter().map(|m| m.document.id.as_str()).collect();
    let second_ids: Vec<&str> = second.matches.iter().map(|m| m.document.id.as_str()).collect();
    assert_eq!(first_ids, second_ids);
}

#[tokio::test]
async fn test_ingestion_is_idempotent() {
    let embedder = BagEmbedder::new();
    let (engine, store) = test_engine(embedder, 60);

    let rec = record("What is zakat?", "Zakat is obligatory charity.", "IslamQA");
    let id = ingest_ok(&engine, &rec).await;

    let outcome = engine.ingest(&rec).await.unwrap();
    assert_eq!(outcome, IngestOutcome::Duplicate(id));
    assert_eq!(store.count().await.unwrap(), 1);

    let health = engine.health().await.unwrap();
    assert_eq!(health.index_size, 1);
}

#[tokio::test]
async fn test_duplicate_ignores_punctuation_and_case() {
    let embedder = BagEmbedder::new();
    let (engine, _store) = test_engine(embedder, 60);

    ingest_ok(&engine, &record("What is Zakat?", "Answer.", "IslamQA")).await;

    let outcome = engine
        .ingest(&record("what   is zakat", "Answer.", "IslamQA"))
        .await
        .unwrap();
    assert!(matches!(outcome, IngestOutcome::Duplicate(_)));
}

#[tokio::test]
async fn test_updated_answer_reuses_document() {
    let embedder = BagEmbedder::new();
    let (engine, store) = test_engine(embedder, 60);

    let id = ingest_ok(&engine, &record("What is zakat?", "Old answer.", "IslamQA")).await;

    let outcome = engine
        .ingest(&record("What is zakat?", "Revised answer.", "IslamQA"))
        .await
        .unwrap();
    assert_eq!(outcome, IngestOutcome::Accepted(id.clone()));

    let doc = store.get(&id).await.unwrap().unwrap();
    assert_eq!(doc.answer_text, "Revised answer.");
    // Re-embedded under the current model.
    assert_eq!(doc.embedding_version.as_deref(), Some("test-bag-v1"));
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_rejects_malformed_records() {
    let embedder = BagEmbedder::new();
    let (engine, store) = test_engine(embedder, 60);

    for rec in [
        record("", "answer", "src"),
        record("question", "", "src"),
        record("question", "answer", ""),
        record("?!", "answer", "src"),
    ] {
        let outcome = engine.ingest(&rec).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Rejected(_)), "{:?}", rec);
    }
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_cache_shared_by_normalization_equal_queries() {
    let embedder = BagEmbedder::new();
    let (engine, _store) = test_engine(embedder.clone(), 60);

    ingest_ok(&engine, &record("What is zakat?", "Charity.", "IslamQA")).await;
    let calls_after_ingest = embedder.calls();

    let first = engine.retrieve(&QueryRequest::new("What is Zakat?", 5)).await;
    assert_eq!(embedder.calls(), calls_after_ingest + 1);

    // Different raw string, same canonical form: served from cache, no new
    // embedding call.
    let second = engine.retrieve(&QueryRequest::new("what   is zakat!!", 5)).await;
    assert_eq!(embedder.calls(), calls_after_ingest + 1);
    assert_eq!(first.matches.len(), second.matches.len());
    assert_eq!(second.query, "what   is zakat!!");

    // Different k misses the cache.
    engine.retrieve(&QueryRequest::new("what is zakat", 3)).await;
    assert_eq!(embedder.calls(), calls_after_ingest + 2);
}

#[tokio::test]
async fn test_cache_expiry_recomputes() {
    let embedder = BagEmbedder::new();
    // ttl 0: every entry is expired by the time it is read back.
    let (engine, _store) = test_engine(embedder.clone(), 0);

    ingest_ok(&engine, &record("What is zakat?", "Charity.", "IslamQA")).await;
    let calls_after_ingest = embedder.calls();

    engine.retrieve(&QueryRequest::new("what is zakat", 5)).await;
    engine.retrieve(&QueryRequest::new("what is zakat", 5)).await;
    assert_eq!(embedder.calls(), calls_after_ingest + 2);
}

#[tokio::test]
async fn test_model_unavailable_degrades_to_lexical() {
    let embedder = BagEmbedder::new();
    let (engine, _store) = test_engine(embedder.clone(), 60);

    ingest_ok(
        &engine,
        &record(
            "What are the pillars of Islam?",
            "The five pillars.",
            "IslamQA",
        ),
    )
    .await;

    embedder.set_fail(true);
    let result = engine
        .retrieve(&QueryRequest::new("five pillars of islam", 5))
        .await;

    assert!(result.degraded);
    assert_eq!(
        result.degraded_reason,
        Some(DegradedReason::EmbeddingUnavailable)
    );
    assert_eq!(result.matches.len(), 1);
    assert!(result.matches[0].confidence < Confidence::High);

    // Recovery is visible immediately: degraded results are not cached.
    embedder.set_fail(false);
    let recovered = engine
        .retrieve(&QueryRequest::new("five pillars of islam", 5))
        .await;
    assert!(!recovered.degraded);
    assert_eq!(recovered.matches[0].confidence, Confidence::High);
}

#[tokio::test]
async fn test_stale_index_reference_is_filtered() {
    let embedder = BagEmbedder::new();
    let (engine, store) = test_engine(embedder, 60);

    let kept = ingest_ok(&engine, &record("What is zakat?", "Charity.", "IslamQA")).await;
    let ghost = ingest_ok(
        &engine,
        &record("Who must pay zakat?", "Every eligible Muslim.", "IslamQA"),
    )
    .await;

    // Simulate the external store losing a document the index still holds.
    store.purge(&ghost);

    let result = engine.retrieve(&QueryRequest::new("zakat", 5)).await;
    assert!(!result.degraded);
    let ids: Vec<&str> = result.matches.iter().map(|m| m.document.id.as_str()).collect();
    assert_eq!(ids, vec![kept.as_str()]);
}

#[tokio::test]
async fn test_deactivated_documents_are_excluded() {
    let embedder = BagEmbedder::new();
    let (engine, _store) = test_engine(embedder, 0);

    let id = ingest_ok(&engine, &record("What is zakat?", "Charity.", "IslamQA")).await;
    assert_eq!(
        engine
            .retrieve(&QueryRequest::new("zakat", 5))
            .await
            .matches
            .len(),
        1
    );

    engine.set_document_active(&id, false).await.unwrap();
    assert!(engine
        .retrieve(&QueryRequest::new("zakat", 5))
        .await
        .matches
        .is_empty());

    engine.set_document_active(&id, true).await.unwrap();
    assert_eq!(
        engine
            .retrieve(&QueryRequest::new("zakat", 5))
            .await
            .matches
            .len(),
        1
    );
}

#[tokio::test]
async fn test_queries_match_only_their_language() {
    let embedder = BagEmbedder::new();
    let (engine, _store) = test_engine(embedder, 60);

    let mut arabic = record(
        "\u{0645}\u{0627} \u{0647}\u{064A} \u{0623}\u{0631}\u{0643}\u{0627}\u{0646} \u{0627}\u{0644}\u{0625}\u{0633}\u{0644}\u{0627}\u{0645}",
        "\u{0627}\u{0644}\u{0623}\u{0631}\u{0643}\u{0627}\u{0646} \u{062E}\u{0645}\u{0633}\u{0629}",
        "Dar al-Ifta",
    );
    arabic.language = None; // exercise detection
    ingest_ok(&engine, &arabic).await;
    ingest_ok(
        &engine,
        &record("What are the pillars of Islam?", "Five pillars.", "IslamQA"),
    )
    .await;

    let en = engine
        .retrieve(&QueryRequest::new("pillars of islam", 5))
        .await;
    assert_eq!(en.language, Language::En);
    assert!(en.matches.iter().all(|m| m.document.language == Language::En));

    let ar = engine
        .retrieve(&QueryRequest::new(
            "\u{0623}\u{0631}\u{0643}\u{0627}\u{0646} \u{0627}\u{0644}\u{0625}\u{0633}\u{0644}\u{0627}\u{0645}",
            5,
        ))
        .await;
    assert_eq!(ar.language, Language::Ar);
    assert!(ar.matches.iter().all(|m| m.document.language == Language::Ar));
    assert!(!ar.matches.is_empty());
}

#[tokio::test]
async fn test_verified_only_filter() {
    let embedder = BagEmbedder::new();
    let (engine, _store) = test_engine(embedder, 60);

    let mut verified = record("What is riba?", "Usury.", "Dar al-Ifta");
    verified.verified = true;
    let verified_id = ingest_ok(&engine, &verified).await;
    ingest_ok(&engine, &record("How is riba?", "Interest.", "IslamQA")).await;

    let request = QueryRequest {
        query: "riba".to_string(),
        language: Some(Language::En),
        k: 5,
        filters: QueryFilters {
            verified_only: true,
            source_name: None,
        },
    };
    let result = engine.retrieve(&request).await;
    let ids: Vec<&str> = result.matches.iter().map(|m| m.document.id.as_str()).collect();
    assert_eq!(ids, vec![verified_id.as_str()]);
}

#[tokio::test]
async fn test_pending_documents_recover_via_reindex_changed() {
    let embedder = BagEmbedder::new();
    let (engine, store) = test_engine(embedder.clone(), 0);

    embedder.set_fail(true);
    let id = ingest_ok(&engine, &record("What is zakat?", "Charity.", "IslamQA")).await;

    // Ingestion survived the embedding outage; the document is pending.
    let doc = store.get(&id).await.unwrap().unwrap();
    assert_eq!(doc.embedding_version, None);
    assert!(engine
        .retrieve(&QueryRequest::new("zakat", 5))
        .await
        .degraded);

    embedder.set_fail(false);
    let embedded = engine.reindex_changed(0).await.unwrap();
    assert_eq!(embedded, 1);

    let doc = store.get(&id).await.unwrap().unwrap();
    assert_eq!(doc.embedding_version.as_deref(), Some("test-bag-v1"));
    assert!(!engine
        .retrieve(&QueryRequest::new("zakat", 5))
        .await
        .degraded);
}

#[tokio::test]
async fn test_reindex_all_rebuilds_and_reports_status() {
    let embedder = BagEmbedder::new();
    let (engine, _store) = test_engine(embedder.clone(), 60);

    embedder.set_fail(true);
    ingest_ok(&engine, &record("What is zakat?", "Charity.", "IslamQA")).await;
    ingest_ok(
        &engine,
        &record("What are the pillars of Islam?", "Five.", "IslamQA"),
    )
    .await;
    embedder.set_fail(false);

    assert_eq!(engine.reindex_status().state, ReindexState::Idle);
    engine.reindex_all();

    let mut state = engine.reindex_status().state;
    for _ in 0..100 {
        if state != ReindexState::Running && state != ReindexState::Idle {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        state = engine.reindex_status().state;
    }

    let status = engine.reindex_status();
    assert_eq!(status.state, ReindexState::Completed);
    assert_eq!(status.documents_embedded, 2);
    assert!(status.finished_at.is_some());

    let health = engine.health().await.unwrap();
    assert_eq!(health.index_size, 2);
    assert!(health.last_rebuild_timestamp.is_some());

    let result = engine
        .retrieve(&QueryRequest::new("pillars of islam", 1))
        .await;
    assert!(!result.degraded);
    assert_eq!(result.matches.len(), 1);
}

#[tokio::test]
async fn test_health_reports_engine_state() {
    let embedder = BagEmbedder::new();
    let (engine, _store) = test_engine(embedder, 60);

    ingest_ok(&engine, &record("What is zakat?", "Charity.", "IslamQA")).await;

    let health = engine.health().await.unwrap();
    assert_eq!(health.index_size, 1);
    assert_eq!(health.document_count, 1);
    assert_eq!(health.embedding_version, "test-bag-v1");
    assert!(health.lexical_terms > 0);

    engine.retrieve(&QueryRequest::new("zakat", 5)).await;
    engine.retrieve(&QueryRequest::new("zakat", 5)).await;
    let health = engine.health().await.unwrap();
    assert!(health.cache_hit_rate > 0.0);
}
