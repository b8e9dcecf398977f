//! In-memory vector index with atomic rebuild.
//!
//! Exact nearest-neighbor search over embedding vectors keyed by document
//! id. At the volumes this engine serves (tens of thousands of documents)
//! a brute-force cosine scan is fast enough; approximate indexing would be
//! a latency optimization, never a correctness requirement.
//!
//! Consistency model:
//! - `upsert`/`remove` are single-key writes under a short write lock;
//!   readers never observe a partially written vector.
//! - `rebuild` is copy-on-build: the replacement map is assembled off-lock,
//!   then swapped in under the write lock. Readers see the pre-rebuild or
//!   post-rebuild index, never a mix.
//! - Only one rebuild may be in flight. Writes issued while a rebuild is
//!   running are journaled and replayed onto the fresh map before the swap,
//!   so they are never lost and never land only on the discarded map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, RwLock};

use crate::embedding::cosine_similarity;
use crate::error::RetrievalError;

enum JournalOp {
    Upsert(String, Vec<f32>),
    Remove(String),
}

/// Vector index over document embeddings.
pub struct VectorIndex {
    vectors: RwLock<HashMap<String, Vec<f32>>>,
    /// `Some` while a rebuild is in flight; writes are mirrored here.
    /// Lock order is always `vectors` before `journal`.
    journal: Mutex<Option<Vec<JournalOp>>>,
    rebuild_gate: Mutex<()>,
    /// Unix timestamp of the last completed rebuild; 0 = never.
    last_rebuild: AtomicI64,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self {
            vectors: RwLock::new(HashMap::new()),
            journal: Mutex::new(None),
            rebuild_gate: Mutex::new(()),
            last_rebuild: AtomicI64::new(0),
        }
    }

    /// Insert or replace the vector for `id`. Safe to call concurrently
    /// with `query` and during a `rebuild`.
    pub fn upsert(&self, id: &str, vector: Vec<f32>) {
        let mut vectors = self.vectors.write().unwrap();
        vectors.insert(id.to_string(), vector.clone());

        let mut journal = self.journal.lock().unwrap();
        if let Some(ops) = journal.as_mut() {
            ops.push(JournalOp::Upsert(id.to_string(), vector));
        }
    }

    /// Mark `id` absent from future query results.
    pub fn remove(&self, id: &str) {
        let mut vectors = self.vectors.write().unwrap();
        vectors.remove(id);

        let mut journal = self.journal.lock().unwrap();
        if let Some(ops) = journal.as_mut() {
            ops.push(JournalOp::Remove(id.to_string()));
        }
    }

    /// Top-`k` most similar ids, sorted by descending similarity with ties
    /// broken by ascending id for determinism.
    pub fn query(&self, query_vec: &[f32], k: usize) -> Result<Vec<(String, f32)>, RetrievalError> {
        let vectors = self
            .vectors
            .read()
            .map_err(|_| RetrievalError::IndexUnavailable("index lock poisoned".to_string()))?;

        let mut scored: Vec<(String, f32)> = vectors
            .iter()
            .map(|(id, vec)| (id.clone(), cosine_similarity(query_vec, vec)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);

        Ok(scored)
    }

    /// Atomically replace the entire index content.
    ///
    /// Concurrent writes are journaled during the build and replayed onto
    /// the fresh map before the swap. Blocks while another rebuild runs.
    pub fn rebuild(&self, pairs: Vec<(String, Vec<f32>)>) {
        let _gate = self.rebuild_gate.lock().unwrap();

        self.journal_begin();
        let fresh: HashMap<String, Vec<f32>> = pairs.into_iter().collect();
        self.swap_in(fresh);

        self.last_rebuild
            .store(chrono::Utc::now().timestamp(), Ordering::SeqCst);
    }

    /// Start mirroring writes into the rebuild journal.
    fn journal_begin(&self) {
        let mut journal = self.journal.lock().unwrap();
        *journal = Some(Vec::new());
    }

    /// Replay the journal onto `fresh`, then swap it in. Holding the write
    /// lock across both steps means a concurrent write either completed
    /// before (and was journaled) or applies to the new map afterwards.
    fn swap_in(&self, mut fresh: HashMap<String, Vec<f32>>) {
        let mut vectors = self.vectors.write().unwrap();
        let mut journal = self.journal.lock().unwrap();

        if let Some(ops) = journal.take() {
            for op in ops {
                match op {
                    JournalOp::Upsert(id, vec) => {
                        fresh.insert(id, vec);
                    }
                    JournalOp::Remove(id) => {
                        fresh.remove(&id);
                    }
                }
            }
        }

        *vectors = fresh;
    }

    pub fn len(&self) -> usize {
        self.vectors.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.vectors.read().unwrap().contains_key(id)
    }

    /// Timestamp of the last completed rebuild, if any.
    pub fn last_rebuild(&self) -> Option<i64> {
        match self.last_rebuild.load(Ordering::SeqCst) {
            0 => None,
            ts => Some(ts),
        }
    }
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}
