//! In-memory [`IndexClient`] for tests and local runs.
//!
//! Points live in a `HashMap` behind a tokio `RwLock`. Dense search is
//! brute-force cosine similarity; keyword search is a dot product over
//! weighted terms, scaled by each query term's inverse document frequency
//! across the collection. A query term of three or more characters that
//! only prefixes a stored term earns half credit.

use std::collections::HashMap;
use std::mem::size_of;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    reject_unrestricted, CollectionStats, IndexClient, IndexFilter, IndexPoint, ScoredPoint,
    WriteToken,
};
use crate::embedding::cosine_similarity;
use crate::error::{CmdexError, Result};
use crate::sparse::SparseTerms;

const PREFIX_MIN_LEN: usize = 3;
const PREFIX_CREDIT: f32 = 0.5;

pub struct MemoryIndex {
    dims: usize,
    created: AtomicBool,
    points: RwLock<HashMap<String, IndexPoint>>,
}

impl MemoryIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            created: AtomicBool::new(false),
            points: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.points.read().await.is_empty()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.points.read().await.contains_key(id)
    }

    /// Snapshot of every stored point, sorted by id.
    pub async fn points(&self) -> Vec<IndexPoint> {
        let mut all: Vec<IndexPoint> = self.points.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

/// `ln(1 + (n - df + 0.5) / (df + 0.5))`, the same smoothing Qdrant's
/// `idf` modifier applies.
fn idf(n: usize, df: usize) -> f32 {
    let (n, df) = (n as f32, df as f32);
    (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
}

fn keyword_score(query: &SparseTerms, idfs: &[f32], doc: &SparseTerms) -> f32 {
    let mut score = 0.0f32;
    for (q, idf) in query.terms.iter().zip(idfs) {
        let qw = q.weight * idf;
        if let Some(w) = doc.weight_of(&q.term) {
            score += qw * w;
            continue;
        }
        if q.term.chars().count() < PREFIX_MIN_LEN {
            continue;
        }
        let best_prefix = doc
            .terms
            .iter()
            .filter(|d| d.term.starts_with(&q.term))
            .map(|d| d.weight)
            .fold(0.0f32, f32::max);
        score += PREFIX_CREDIT * qw * best_prefix;
    }
    score
}

fn rank(mut hits: Vec<ScoredPoint>, top_k: usize) -> Vec<ScoredPoint> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(top_k);
    hits
}

#[async_trait]
impl IndexClient for MemoryIndex {
    async fn ensure_collection(&self, _token: &WriteToken) -> Result<bool> {
        Ok(!self.created.swap(true, Ordering::SeqCst))
    }

    async fn upsert(&self, _token: &WriteToken, points: &[IndexPoint]) -> Result<()> {
        if let Some(bad) = points.iter().find(|p| p.vector.len() != self.dims) {
            return Err(CmdexError::PermanentConfig(format!(
                "vector for {} has {} dims, collection expects {}",
                bad.id,
                bad.vector.len(),
                self.dims
            )));
        }
        let mut stored = self.points.write().await;
        for p in points {
            stored.insert(p.id.clone(), p.clone());
        }
        Ok(())
    }

    async fn delete_by_filter(&self, _token: &WriteToken, filter: &IndexFilter) -> Result<()> {
        reject_unrestricted(filter)?;
        let mut stored = self.points.write().await;
        stored.retain(|id, p| !filter.matches(id, &p.payload));
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        filter: &IndexFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let stored = self.points.read().await;
        let hits = stored
            .values()
            .filter(|p| filter.matches(&p.id, &p.payload))
            .map(|p| ScoredPoint {
                id: p.id.clone(),
                score: cosine_similarity(vector, &p.vector) as f64,
                payload: p.payload.clone(),
            })
            .collect();
        Ok(rank(hits, top_k))
    }

    async fn keyword_search(
        &self,
        terms: &SparseTerms,
        filter: &IndexFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredPoint>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let stored = self.points.read().await;
        let idfs: Vec<f32> = terms
            .terms
            .iter()
            .map(|q| {
                let df = stored
                    .values()
                    .filter(|p| p.sparse.weight_of(&q.term).is_some())
                    .count();
                idf(stored.len(), df)
            })
            .collect();
        let hits = stored
            .values()
            .filter(|p| filter.matches(&p.id, &p.payload))
            .filter_map(|p| {
                let score = keyword_score(terms, &idfs, &p.sparse);
                (score > 0.0).then(|| ScoredPoint {
                    id: p.id.clone(),
                    score: score as f64,
                    payload: p.payload.clone(),
                })
            })
            .collect();
        Ok(rank(hits, top_k))
    }

    async fn reset_collection(&self, _token: &WriteToken) -> Result<()> {
        self.points.write().await.clear();
        self.created.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stats(&self) -> Result<CollectionStats> {
        let stored = self.points.read().await;
        let ram: usize = stored
            .values()
            .map(|p| {
                p.id.len()
                    + p.vector.len() * size_of::<f32>()
                    + p.sparse
                        .terms
                        .iter()
                        .map(|t| t.term.len() + size_of::<f32>())
                        .sum::<usize>()
            })
            .sum();
        Ok(CollectionStats {
            vector_count: stored.len() as u64,
            collection_status: "green".to_string(),
            disk_usage: None,
            ram_usage: Some(ram as u64),
        })
    }
}
