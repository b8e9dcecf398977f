//! SQLite-backed [`DocumentStore`] implementation.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::models::{Document, Language};

use super::DocumentStore;

/// SQLite implementation of the [`DocumentStore`] trait.
///
/// Wraps a [`SqlitePool`] and translates every operation into SQL against
/// the `documents` and `document_vectors` tables created by
/// [`crate::migrate::run_migrations`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const DOCUMENT_COLUMNS: &str = "id, language, question_text, answer_text, source_name, \
     source_url, verified, source_priority, content_hash, embedding_version, active, \
     created_at, updated_at";

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    let language: String = row.get("language");
    let language = Language::parse(&language)
        .ok_or_else(|| anyhow::anyhow!("Unknown language in store: {}", language))?;

    Ok(Document {
        id: row.get("id"),
        language,
        question_text: row.get("question_text"),
        answer_text: row.get("answer_text"),
        source_name: row.get("source_name"),
        source_url: row.get("source_url"),
        verified: row.get("verified"),
        source_priority: row.get("source_priority"),
        content_hash: row.get("content_hash"),
        embedding_version: row.get("embedding_version"),
        active: row.get("active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn insert(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, language, question_text, answer_text, source_name,
                                   source_url, verified, source_priority, content_hash,
                                   embedding_version, active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(doc.language.as_str())
        .bind(&doc.question_text)
        .bind(&doc.answer_text)
        .bind(&doc.source_name)
        .bind(&doc.source_url)
        .bind(doc.verified)
        .bind(doc.source_priority)
        .bind(&doc.content_hash)
        .bind(&doc.embedding_version)
        .bind(doc.active)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_document).transpose()
    }

    async fn get_batch(&self, ids: &[String]) -> Result<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM documents WHERE id IN ({})",
            DOCUMENT_COLUMNS, placeholders
        );

        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut by_id = std::collections::HashMap::with_capacity(rows.len());
        for row in &rows {
            let doc = row_to_document(row)?;
            by_id.insert(doc.id.clone(), doc);
        }

        // Preserve the caller's order; missing ids are silently omitted.
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn find_by_content_hash(
        &self,
        hash: &str,
        language: Language,
    ) -> Result<Option<String>> {
        let id: Option<String> = sqlx::query_scalar(
            "SELECT id FROM documents WHERE content_hash = ? AND language = ? ORDER BY id LIMIT 1",
        )
        .bind(hash)
        .bind(language.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    async fn update_answer(&self, id: &str, answer_text: &str, updated_at: i64) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET answer_text = ?, embedding_version = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(answer_text)
        .bind(updated_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_verified(&self, id: &str, verified: bool, updated_at: i64) -> Result<()> {
        sqlx::query("UPDATE documents SET verified = ?, updated_at = ? WHERE id = ?")
            .bind(verified)
            .bind(updated_at)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn set_active(&self, id: &str, active: bool, updated_at: i64) -> Result<()> {
        sqlx::query("UPDATE documents SET active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(updated_at)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn mark_embedded(&self, id: &str, version: &str) -> Result<()> {
        sqlx::query("UPDATE documents SET embedding_version = ? WHERE id = ?")
            .bind(version)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_changed_since(&self, since: i64) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE updated_at > ? ORDER BY id",
            DOCUMENT_COLUMNS
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_document).collect()
    }

    async fn list_all(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents ORDER BY id",
            DOCUMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_document).collect()
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn put_vector(&self, id: &str, model: &str, vector: &[f32]) -> Result<()> {
        let blob = vec_to_blob(vector);
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO document_vectors (document_id, model, dims, embedding, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(document_id) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                embedding = excluded.embedding,
                created_at = excluded.created_at
            "#,
        )
        .bind(id)
        .bind(model)
        .bind(vector.len() as i64)
        .bind(&blob)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_vectors(&self, model: &str) -> Result<Vec<(String, Vec<f32>)>> {
        let rows = sqlx::query(
            "SELECT document_id, embedding FROM document_vectors WHERE model = ? ORDER BY document_id",
        )
        .bind(model)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                (row.get("document_id"), blob_to_vec(&blob))
            })
            .collect())
    }

    async fn delete_vector(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM document_vectors WHERE document_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
