//! Embedding client abstraction.
//!
//! Defines the [`Embedder`] trait, the only seam through which the crate
//! talks to an embedding model, and [`HttpEmbedder`], which speaks one of
//! three wire dialects:
//! - **service**: `POST {url}/embed {"texts": [...]}` → `{"vectors": [[...]]}`
//! - **ollama**: `POST {url}/api/embed {"model", "input"}` → `{"embeddings"}`
//! - **openai**: `POST {url}/v1/embeddings {"model", "input"}` → `{"data": [{"embedding", "index"}]}`
//!
//! Every returned vector is checked against the configured dimensionality.
//! There is no fallback: if the model cannot be reached, embedding fails.
//!
//! # Retry Strategy
//!
//! Requests are wrapped in the injected [`RetryPolicy`]:
//! - HTTP 429 and 5xx, network errors, timeouts → retry
//! - Other HTTP 4xx, wrong vector count or dimensionality → fail immediately

mod http;

pub use http::{Dialect, HttpEmbedder};

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::EmbeddingConfig;
use crate::error::{CmdexError, Result};
use crate::retry::RetryPolicy;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"BAAI/bge-small-en-v1.5"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed texts. Output order matches input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let results = embedder.embed_batch(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| CmdexError::PermanentConfig("empty embedding response".into()))
}

/// Build the configured embedder.
pub fn create_embedder(config: &EmbeddingConfig, retry: RetryPolicy) -> Result<Arc<dyn Embedder>> {
    let dialect: Dialect = config.provider.parse()?;
    Ok(Arc::new(HttpEmbedder::new(config, dialect, retry)?))
}

/// Check that a response holds `expected` vectors of `dims` values each.
pub fn check_vectors(vectors: &[Vec<f32>], expected: usize, dims: usize) -> Result<()> {
    if vectors.len() != expected {
        return Err(CmdexError::PermanentConfig(format!(
            "embedding service returned {} vectors for {} texts",
            vectors.len(),
            expected
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(CmdexError::PermanentConfig(format!(
            "embedding dimensionality mismatch: expected {}, got {}",
            dims,
            bad.len()
        )));
    }
    Ok(())
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
///
/// # Formula
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
