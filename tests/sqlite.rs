//! SQLite store and bootstrap tests against a scratch database.

use tempfile::TempDir;

use minbar::config::Config;
use minbar::engine::RetrievalEngine;
use minbar::models::{Document, IngestOutcome, Language, QaRecord, QueryRequest};
use minbar::store::{DocumentStore, SqliteStore};
use minbar::{db, migrate};

fn test_config(tmp: &TempDir) -> Config {
    let mut config = Config::minimal();
    config.db.path = tmp.path().join("data").join("minbar.sqlite");
    config
}

async fn setup_store(config: &Config) -> SqliteStore {
    let pool = db::connect(config).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    SqliteStore::new(pool)
}

fn doc(id: &str, hash: &str, updated_at: i64) -> Document {
    Document {
        id: id.to_string(),
        language: Language::En,
        question_text: "What is zakat?".to_string(),
        answer_text: "Obligatory charity.".to_string(),
        source_name: "IslamQA".to_string(),
        source_url: Some("https://example.org/zakat".to_string()),
        verified: true,
        source_priority: 3,
        content_hash: hash.to_string(),
        embedding_version: None,
        active: true,
        created_at: updated_at,
        updated_at,
    }
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);

    migrate::run_migrations(&config).await.unwrap();
    migrate::run_migrations(&config).await.unwrap();

    let store = setup_store(&config).await;
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_document_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = setup_store(&config).await;

    let original = doc("a", "h1", 100);
    store.insert(&original).await.unwrap();

    let loaded = store.get("a").await.unwrap().unwrap();
    assert_eq!(loaded.language, Language::En);
    assert_eq!(loaded.question_text, original.question_text);
    assert_eq!(loaded.answer_text, original.answer_text);
    assert_eq!(loaded.source_name, original.source_name);
    assert_eq!(loaded.source_url, original.source_url);
    assert!(loaded.verified);
    assert_eq!(loaded.source_priority, 3);
    assert_eq!(loaded.content_hash, "h1");
    assert_eq!(loaded.embedding_version, None);
    assert!(loaded.active);

    assert!(store.get("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn test_get_batch_preserves_order_and_omits_missing() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = setup_store(&config).await;

    store.insert(&doc("b", "h1", 100)).await.unwrap();
    store.insert(&doc("a", "h2", 100)).await.unwrap();

    let got = store
        .get_batch(&["b".to_string(), "ghost".to_string(), "a".to_string()])
        .await
        .unwrap();
    let ids: Vec<&str> = got.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);
}

#[tokio::test]
async fn test_find_by_content_hash_respects_language() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = setup_store(&config).await;

    store.insert(&doc("a", "h1", 100)).await.unwrap();

    assert_eq!(
        store
            .find_by_content_hash("h1", Language::En)
            .await
            .unwrap(),
        Some("a".to_string())
    );
    assert_eq!(
        store
            .find_by_content_hash("h1", Language::Ar)
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn test_update_answer_clears_embedding_version() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = setup_store(&config).await;

    store.insert(&doc("a", "h1", 100)).await.unwrap();
    store.mark_embedded("a", "model-v1").await.unwrap();
    assert_eq!(
        store.get("a").await.unwrap().unwrap().embedding_version,
        Some("model-v1".to_string())
    );

    store.update_answer("a", "Revised.", 200).await.unwrap();
    let updated = store.get("a").await.unwrap().unwrap();
    assert_eq!(updated.answer_text, "Revised.");
    assert_eq!(updated.embedding_version, None);
    assert_eq!(updated.updated_at, 200);
}

#[tokio::test]
async fn test_list_changed_since_is_strict() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = setup_store(&config).await;

    store.insert(&doc("a", "h1", 100)).await.unwrap();
    store.insert(&doc("b", "h2", 300)).await.unwrap();

    let changed = store.list_changed_since(100).await.unwrap();
    let ids: Vec<&str> = changed.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["b"]);
}

#[tokio::test]
async fn test_vector_persistence_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = setup_store(&config).await;

    store.insert(&doc("a", "h1", 100)).await.unwrap();
    store
        .put_vector("a", "model-v1", &[0.25, -0.5, 1.0])
        .await
        .unwrap();

    let loaded = store.load_vectors("model-v1").await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].0, "a");
    assert_eq!(loaded[0].1, vec![0.25, -0.5, 1.0]);
    assert!(store.load_vectors("other-model").await.unwrap().is_empty());

    // Replacement, then removal.
    store.put_vector("a", "model-v1", &[1.0]).await.unwrap();
    assert_eq!(
        store.load_vectors("model-v1").await.unwrap()[0].1,
        vec![1.0]
    );
    store.delete_vector("a").await.unwrap();
    assert!(store.load_vectors("model-v1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_bootstrap_ingests_and_warm_starts() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);

    // Default config has the embedding provider disabled: ingestion still
    // accepts documents (pending re-embed) and queries serve via the
    // lexical fallback.
    let engine = RetrievalEngine::bootstrap(&config).await.unwrap();
    let outcome = engine
        .ingest(&QaRecord {
            question_text: "What is zakat?".to_string(),
            answer_text: "Obligatory charity.".to_string(),
            language: Some(Language::En),
            source_name: "IslamQA".to_string(),
            source_url: None,
            verified: true,
            source_priority: 0,
        })
        .await
        .unwrap();
    assert!(matches!(outcome, IngestOutcome::Accepted(_)));

    let result = engine.retrieve(&QueryRequest::new("zakat", 5)).await;
    assert!(result.degraded);
    assert_eq!(result.matches.len(), 1);
    drop(engine);

    // A fresh process over the same database rebuilds the lexical index
    // from the store.
    let engine = RetrievalEngine::bootstrap(&config).await.unwrap();
    let health = engine.health().await.unwrap();
    assert_eq!(health.document_count, 1);

    let result = engine.retrieve(&QueryRequest::new("zakat", 5)).await;
    assert_eq!(result.matches.len(), 1);
    assert_eq!(result.matches[0].document.question_text, "What is zakat?");
}
