//! Hybrid query engine: dense + keyword retrieval with score fusion.
//!
//! The engine reads only from the index (and the embedder, for the query
//! vector). It never touches the relational store: everything a result
//! needs, including the cross-version equivalent, is in the payload.
//!
//! # Scoring
//!
//! 1. Embed the query. Failure is [`CmdexError::EmbeddingUnavailable`];
//!    there is no keyword-only fallback.
//! 2. Fetch `limit × overfetch_factor` dense candidates and as many
//!    keyword candidates, with the same filter.
//! 3. Min-max normalize each channel to `[0, 1]`.
//! 4. Fuse: `fused = w_dense × dense + w_sparse × keyword`; a unit missing
//!    from one channel gets 0 there.
//! 5. Collapse chunks of the same documentation section to the best one,
//!    unless all chunks were requested.
//! 6. Attach the mapped equivalent command when the query spans versions.
//! 7. Sort by fused score (desc), entity priority
//!    (Command > Example > Parameter > DocChunk), id (asc); truncate.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, Embedder};
use crate::error::{CmdexError, Result};
use crate::index::{IndexClient, IndexFilter, ScoredPoint};
use crate::models::{EntityType, SearchResult, Version};
use crate::sparse;

/// Retrieval tuning parameters.
#[derive(Debug, Clone)]
pub struct QueryParams {
    pub dense_weight: f64,
    pub sparse_weight: f64,
    pub overfetch_factor: usize,
    pub default_limit: usize,
    pub max_limit: usize,
}

impl QueryParams {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            dense_weight: config.dense_weight,
            sparse_weight: config.sparse_weight,
            overfetch_factor: config.overfetch_factor.max(1),
            default_limit: config.default_limit.max(1),
            max_limit: config.max_limit.max(1),
        }
    }

    /// Requested limit, defaulted and clamped to `[1, max_limit]`.
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit)
    }
}

impl Default for QueryParams {
    fn default() -> Self {
        Self::from_config(&RetrievalConfig::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    pub version: Option<Version>,
    pub include_deprecated: bool,
    pub entity_types: Option<Vec<EntityType>>,
    pub include_all_chunks: bool,
}

impl SearchFilters {
    pub fn to_index_filter(&self) -> IndexFilter {
        IndexFilter {
            version: self.version,
            include_deprecated: self.include_deprecated,
            entity_types: self.entity_types.clone(),
            command: None,
            ids: None,
        }
    }
}

pub struct QueryEngine {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn IndexClient>,
    params: QueryParams,
}

impl QueryEngine {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn IndexClient>, params: QueryParams) -> Self {
        Self {
            embedder,
            index,
            params,
        }
    }

    pub fn params(&self) -> &QueryParams {
        &self.params
    }

    pub async fn query(
        &self,
        text: &str,
        filters: &SearchFilters,
        limit: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let limit = self.params.effective_limit(limit);
        let top_k = limit.saturating_mul(self.params.overfetch_factor);

        let vector = embed_query(self.embedder.as_ref(), text)
            .await
            .map_err(|e| CmdexError::EmbeddingUnavailable(e.to_string()))?;

        let filter = filters.to_index_filter();
        let terms = sparse::encode(text);
        let (dense, keyword) = futures::try_join!(
            self.index.search(&vector, &filter, top_k),
            self.index.keyword_search(&terms, &filter, top_k),
        )
        .map_err(|e| CmdexError::IndexUnavailable(e.to_string()))?;

        debug!(
            dense = dense.len(),
            keyword = keyword.len(),
            limit,
            "query candidates"
        );
        Ok(fuse_results(&dense, &keyword, &self.params, filters, limit))
    }
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal, they are normalized to `1.0`.
pub fn normalize_scores(candidates: &[ScoredPoint]) -> Vec<(&ScoredPoint, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

pub fn fuse(dense: f64, keyword: f64, params: &QueryParams) -> f64 {
    params.dense_weight * dense + params.sparse_weight * keyword
}

fn rank_order(a: &SearchResult, b: &SearchResult) -> std::cmp::Ordering {
    b.fused_score
        .partial_cmp(&a.fused_score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then(a.entity_type.priority().cmp(&b.entity_type.priority()))
        .then(a.id.cmp(&b.id))
}

/// Fuse raw candidates from both channels into ranked results.
pub fn fuse_results(
    dense: &[ScoredPoint],
    keyword: &[ScoredPoint],
    params: &QueryParams,
    filters: &SearchFilters,
    limit: usize,
) -> Vec<SearchResult> {
    let dense_map: HashMap<&str, f64> = normalize_scores(dense)
        .into_iter()
        .map(|(c, s)| (c.id.as_str(), s))
        .collect();
    let keyword_map: HashMap<&str, f64> = normalize_scores(keyword)
        .into_iter()
        .map(|(c, s)| (c.id.as_str(), s))
        .collect();

    let mut all: HashMap<&str, &ScoredPoint> = HashMap::new();
    for c in dense.iter().chain(keyword.iter()) {
        all.entry(c.id.as_str()).or_insert(c);
    }

    let enrich = filters.version.is_none();
    let mut results: Vec<SearchResult> = all
        .into_iter()
        .map(|(id, point)| {
            let d = dense_map.get(id).copied().unwrap_or(0.0);
            let k = keyword_map.get(id).copied().unwrap_or(0.0);
            SearchResult {
                id: id.to_string(),
                entity_type: point.payload.entity_type(),
                score: d,
                keyword_score: k,
                fused_score: fuse(d, k, params),
                payload: point.payload.clone(),
                enrichment: if enrich {
                    point.payload.mapped_command().cloned()
                } else {
                    None
                },
            }
        })
        .collect();

    results.sort_by(rank_order);

    if !filters.include_all_chunks {
        let mut best: HashMap<String, usize> = HashMap::new();
        let mut kept = Vec::with_capacity(results.len());
        for r in results {
            let key = r.payload.dedup_key(&r.id).to_string();
            // Sorted input: the first result per key is the best one.
            if best.contains_key(&key) {
                continue;
            }
            best.insert(key, kept.len());
            kept.push(r);
        }
        results = kept;
    }

    results.truncate(limit);
    results
}
