//! In-memory [`DocumentStore`] implementation for testing.
//!
//! `HashMap`s behind `std::sync::RwLock`; all futures are immediately
//! ready.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Document, Language};

use super::DocumentStore;

/// In-memory store for tests and ephemeral deployments.
pub struct MemoryStore {
    docs: RwLock<HashMap<String, Document>>,
    vectors: RwLock<HashMap<String, (String, Vec<f32>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            vectors: RwLock::new(HashMap::new()),
        }
    }

    /// Hard-remove a document, simulating an external owner deleting rows
    /// out from under the engine. The engine itself never deletes.
    pub fn purge(&self, id: &str) {
        self.docs.write().unwrap().remove(id);
        self.vectors.write().unwrap().remove(id);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, doc: &Document) -> Result<()> {
        let mut docs = self.docs.write().unwrap();
        docs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        let docs = self.docs.read().unwrap();
        Ok(docs.get(id).cloned())
    }

    async fn get_batch(&self, ids: &[String]) -> Result<Vec<Document>> {
        let docs = self.docs.read().unwrap();
        Ok(ids.iter().filter_map(|id| docs.get(id).cloned()).collect())
    }

    async fn find_by_content_hash(
        &self,
        hash: &str,
        language: Language,
    ) -> Result<Option<String>> {
        let docs = self.docs.read().unwrap();
        let mut matches: Vec<&Document> = docs
            .values()
            .filter(|d| d.content_hash == hash && d.language == language)
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches.first().map(|d| d.id.clone()))
    }

    async fn update_answer(&self, id: &str, answer_text: &str, updated_at: i64) -> Result<()> {
        let mut docs = self.docs.write().unwrap();
        if let Some(doc) = docs.get_mut(id) {
            doc.answer_text = answer_text.to_string();
            doc.embedding_version = None;
            doc.updated_at = updated_at;
        }
        Ok(())
    }

    async fn set_verified(&self, id: &str, verified: bool, updated_at: i64) -> Result<()> {
        let mut docs = self.docs.write().unwrap();
        if let Some(doc) = docs.get_mut(id) {
            doc.verified = verified;
            doc.updated_at = updated_at;
        }
        Ok(())
    }

    async fn set_active(&self, id: &str, active: bool, updated_at: i64) -> Result<()> {
        let mut docs = self.docs.write().unwrap();
        if let Some(doc) = docs.get_mut(id) {
            doc.active = active;
            doc.updated_at = updated_at;
        }
        Ok(())
    }

    async fn mark_embedded(&self, id: &str, version: &str) -> Result<()> {
        let mut docs = self.docs.write().unwrap();
        if let Some(doc) = docs.get_mut(id) {
            doc.embedding_version = Some(version.to_string());
        }
        Ok(())
    }

    async fn list_changed_since(&self, since: i64) -> Result<Vec<Document>> {
        let docs = self.docs.read().unwrap();
        let mut changed: Vec<Document> = docs
            .values()
            .filter(|d| d.updated_at > since)
            .cloned()
            .collect();
        changed.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(changed)
    }

    async fn list_all(&self) -> Result<Vec<Document>> {
        let docs = self.docs.read().unwrap();
        let mut all: Vec<Document> = docs.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.docs.read().unwrap().len() as i64)
    }

    async fn put_vector(&self, id: &str, model: &str, vector: &[f32]) -> Result<()> {
        let mut vectors = self.vectors.write().unwrap();
        vectors.insert(id.to_string(), (model.to_string(), vector.to_vec()));
        Ok(())
    }

    async fn load_vectors(&self, model: &str) -> Result<Vec<(String, Vec<f32>)>> {
        let vectors = self.vectors.read().unwrap();
        let mut loaded: Vec<(String, Vec<f32>)> = vectors
            .iter()
            .filter(|(_, (m, _))| m == model)
            .map(|(id, (_, vec))| (id.clone(), vec.clone()))
            .collect();
        loaded.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(loaded)
    }

    async fn delete_vector(&self, id: &str) -> Result<()> {
        self.vectors.write().unwrap().remove(id);
        Ok(())
    }
}
