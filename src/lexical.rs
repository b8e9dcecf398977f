//! Inverted-index lexical fallback.
//!
//! A small in-memory inverted index over normalized question tokens, used
//! when the embedding backend is unavailable or over budget. Scores are
//! token-set Jaccard overlap, so results from this path carry inherently
//! lower confidence than semantic matches.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

struct Inner {
    /// token -> document ids containing it
    postings: HashMap<String, HashSet<String>>,
    /// document id -> its token set
    doc_tokens: HashMap<String, HashSet<String>>,
}

pub struct LexicalIndex {
    inner: RwLock<Inner>,
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                postings: HashMap::new(),
                doc_tokens: HashMap::new(),
            }),
        }
    }

    /// Index (or re-index) a document's normalized question tokens.
    pub fn insert(&self, doc_id: &str, tokens: &[String]) {
        let mut inner = self.inner.write().unwrap();
        remove_locked(&mut inner, doc_id);

        let token_set: HashSet<String> = tokens.iter().cloned().collect();
        for token in &token_set {
            inner
                .postings
                .entry(token.clone())
                .or_default()
                .insert(doc_id.to_string());
        }
        inner.doc_tokens.insert(doc_id.to_string(), token_set);
    }

    pub fn remove(&self, doc_id: &str) {
        let mut inner = self.inner.write().unwrap();
        remove_locked(&mut inner, doc_id);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.postings.clear();
        inner.doc_tokens.clear();
    }

    /// Top-`k` documents by Jaccard overlap with the query tokens, sorted
    /// by descending score with ties broken by ascending id.
    pub fn query(&self, tokens: &[String], k: usize) -> Vec<(String, f64)> {
        let query_set: HashSet<&str> = tokens.iter().map(String::as_str).collect();
        if query_set.is_empty() {
            return Vec::new();
        }

        let inner = self.inner.read().unwrap();

        let mut candidates: HashSet<&String> = HashSet::new();
        for token in &query_set {
            if let Some(ids) = inner.postings.get(*token) {
                candidates.extend(ids);
            }
        }

        let mut scored: Vec<(String, f64)> = candidates
            .into_iter()
            .filter_map(|id| {
                let doc_set = inner.doc_tokens.get(id)?;
                let overlap = doc_set
                    .iter()
                    .filter(|t| query_set.contains(t.as_str()))
                    .count();
                let union = doc_set.len() + query_set.len() - overlap;
                if union == 0 {
                    return None;
                }
                Some((id.clone(), overlap as f64 / union as f64))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }

    /// Number of distinct indexed terms.
    pub fn term_count(&self) -> usize {
        self.inner.read().unwrap().postings.len()
    }
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_locked(inner: &mut Inner, doc_id: &str) {
    if let Some(tokens) = inner.doc_tokens.remove(doc_id) {
        for token in tokens {
            if let Some(ids) = inner.postings.get_mut(&token) {
                ids.remove(doc_id);
                if ids.is_empty() {
                    inner.postings.remove(&token);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_query_scores_by_overlap() {
        let index = LexicalIndex::new();
        index.insert("d1", &toks("pillars of islam"));
        index.insert("d2", &toks("daily prayers count"));

        let hits = index.query(&toks("five pillars of islam"), 5);
        assert_eq!(hits[0].0, "d1");
        // overlap 3, union 4
        assert!((hits[0].1 - 0.75).abs() < 1e-9);
        assert!(hits.iter().all(|(id, _)| id != "d2"));
    }

    #[test]
    fn test_query_ties_break_by_id() {
        let index = LexicalIndex::new();
        index.insert("b", &toks("zakat"));
        index.insert("a", &toks("zakat"));

        let hits = index.query(&toks("zakat"), 5);
        let ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_reinsert_replaces_tokens() {
        let index = LexicalIndex::new();
        index.insert("d1", &toks("old terms"));
        index.insert("d1", &toks("new words"));

        assert!(index.query(&toks("old"), 5).is_empty());
        assert_eq!(index.query(&toks("new"), 5).len(), 1);
    }

    #[test]
    fn test_remove_and_term_count() {
        let index = LexicalIndex::new();
        index.insert("d1", &toks("alpha beta"));
        assert_eq!(index.term_count(), 2);

        index.remove("d1");
        assert_eq!(index.term_count(), 0);
        assert!(index.query(&toks("alpha"), 5).is_empty());
    }

    #[test]
    fn test_empty_query_returns_nothing() {
        let index = LexicalIndex::new();
        index.insert("d1", &toks("alpha"));
        assert!(index.query(&[], 5).is_empty());
    }
}
