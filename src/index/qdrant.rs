//! Qdrant REST backend.
//!
//! Collection layout: a named dense vector `dense` (cosine) and a named
//! sparse vector `text` holding the keyword terms, hashed to numeric
//! indices with [`term_index`](crate::sparse::term_index). Payloads are
//! the JSON form of [`UnitPayload`], so filters address `version`,
//! `isDeprecated`, `entityType` and `commandId` directly.
//!
//! Every request goes through the injected [`RetryPolicy`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{
    reject_unrestricted, CollectionStats, IndexClient, IndexFilter, IndexPoint, ScoredPoint,
    WriteToken,
};
use crate::config::IndexConfig;
use crate::error::{status_error, CmdexError, Result};
use crate::models::UnitPayload;
use crate::retry::RetryPolicy;
use crate::sparse::SparseTerms;

const DENSE_VECTOR: &str = "dense";
const SPARSE_VECTOR: &str = "text";

pub struct QdrantIndex {
    http: reqwest::Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
    dims: usize,
    retry: RetryPolicy,
}

#[derive(Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Deserialize)]
struct CollectionInfo {
    status: String,
    #[serde(default)]
    points_count: Option<u64>,
    #[serde(default)]
    vectors_count: Option<u64>,
    #[serde(default)]
    config: Option<Value>,
}

#[derive(Deserialize)]
struct Hit {
    id: Value,
    score: f64,
    #[serde(default)]
    payload: Option<Value>,
}

impl QdrantIndex {
    pub fn new(config: &IndexConfig, dims: usize, retry: RetryPolicy) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CmdexError::PermanentConfig(format!("http client: {}", e)))?;
        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_key: config.resolved_api_key(),
            dims,
            retry,
        })
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, suffix)
    }

    /// One request, no retry. Returns the status and raw body.
    async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> Result<(StatusCode, String)> {
        let mut req = self.http.request(method, url);
        if let Some(key) = &self.api_key {
            req = req.header("api-key", key);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        let response = req.send().await?;
        let status = response.status();
        let text = response.text().await?;
        Ok((status, text))
    }

    /// Retrying request that treats any non-success status as an error.
    async fn call(&self, label: &str, method: Method, url: &str, body: Option<&Value>) -> Result<String> {
        self.retry
            .run(label, || {
                let method = method.clone();
                async move {
                    let (status, text) = self.send(method, url, body).await?;
                    if status.is_success() {
                        Ok(text)
                    } else {
                        Err(status_error("qdrant", status, &text))
                    }
                }
            })
            .await
    }

    /// Collection info, or `None` when the collection does not exist.
    async fn collection_info(&self) -> Result<Option<CollectionInfo>> {
        let url = self.collection_url("");
        self.retry
            .run("qdrant get collection", || async {
                let (status, text) = self.send(Method::GET, &url, None).await?;
                match status {
                    StatusCode::NOT_FOUND => Ok(None),
                    s if s.is_success() => {
                        let env: Envelope<CollectionInfo> = parse(&text)?;
                        Ok(Some(env.result))
                    }
                    s => Err(status_error("qdrant", s, &text)),
                }
            })
            .await
    }

    async fn create_collection(&self) -> Result<()> {
        let body = json!({
            "vectors": {
                DENSE_VECTOR: { "size": self.dims, "distance": "Cosine" }
            },
            "sparse_vectors": {
                SPARSE_VECTOR: { "modifier": "idf" }
            }
        });
        let url = self.collection_url("");
        self.call("qdrant create collection", Method::PUT, &url, Some(&body))
            .await?;
        info!(collection = %self.collection, dims = self.dims, "created qdrant collection");
        Ok(())
    }

    async fn query(&self, vector: Value, filter: &IndexFilter, top_k: usize) -> Result<Vec<ScoredPoint>> {
        let mut body = json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": true,
        });
        if let Some(f) = filter_json(filter) {
            body["filter"] = f;
        }
        let url = self.collection_url("/points/search");
        let text = self
            .call("qdrant search", Method::POST, &url, Some(&body))
            .await?;
        let env: Envelope<Vec<Hit>> = parse(&text)?;

        let mut points = Vec::with_capacity(env.result.len());
        for hit in env.result {
            let id = match &hit.id {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let payload = hit
                .payload
                .and_then(|p| serde_json::from_value::<UnitPayload>(p).ok());
            match payload {
                Some(payload) => points.push(ScoredPoint {
                    id,
                    score: hit.score,
                    payload,
                }),
                None => warn!(point = %id, "skipping qdrant point with unreadable payload"),
            }
        }
        Ok(points)
    }
}

fn parse<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text)
        .map_err(|e| CmdexError::PermanentConfig(format!("malformed qdrant response: {}", e)))
}

fn sparse_json(terms: &SparseTerms) -> Value {
    let (indices, values) = terms.to_indexed();
    json!({ "indices": indices, "values": values })
}

/// Translate an [`IndexFilter`] into a Qdrant filter, or `None` when it
/// matches everything.
pub fn filter_json(filter: &IndexFilter) -> Option<Value> {
    let mut must = Vec::new();
    let mut must_not = Vec::new();

    if let Some(version) = filter.version {
        must.push(json!({
            "should": [
                { "key": "version", "match": { "value": version.as_u8() } },
                { "is_empty": { "key": "version" } }
            ]
        }));
    }
    if !filter.include_deprecated {
        must_not.push(json!({ "key": "isDeprecated", "match": { "value": true } }));
    }
    if let Some(types) = &filter.entity_types {
        let names: Vec<&str> = types.iter().map(|t| t.as_str()).collect();
        must.push(json!({ "key": "entityType", "match": { "any": names } }));
    }
    if let Some(key) = filter.command {
        must.push(json!({ "key": "commandId", "match": { "value": key.id } }));
        must.push(json!({ "key": "version", "match": { "value": key.version.as_u8() } }));
        must.push(json!({ "key": "entityType", "match": { "any": ["Command", "Parameter", "Example"] } }));
    }
    if let Some(ids) = &filter.ids {
        must.push(json!({ "has_id": ids }));
    }

    if must.is_empty() && must_not.is_empty() {
        return None;
    }
    let mut out = json!({});
    if !must.is_empty() {
        out["must"] = Value::Array(must);
    }
    if !must_not.is_empty() {
        out["must_not"] = Value::Array(must_not);
    }
    Some(out)
}

#[async_trait]
impl IndexClient for QdrantIndex {
    async fn ensure_collection(&self, _token: &WriteToken) -> Result<bool> {
        let info = match self.collection_info().await? {
            Some(info) => info,
            None => {
                self.create_collection().await?;
                return Ok(true);
            }
        };
        let size = info
            .config
            .as_ref()
            .and_then(|c| c.pointer(&format!("/params/vectors/{}/size", DENSE_VECTOR)))
            .and_then(Value::as_u64);
        match size {
            Some(size) if size as usize == self.dims => Ok(false),
            Some(size) => Err(CmdexError::PermanentConfig(format!(
                "collection {} has {}-dim vectors, embedder produces {}",
                self.collection, size, self.dims
            ))),
            None => Err(CmdexError::PermanentConfig(format!(
                "collection {} has no '{}' vector",
                self.collection, DENSE_VECTOR
            ))),
        }
    }

    async fn upsert(&self, _token: &WriteToken, points: &[IndexPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let wire: Vec<Value> = points
            .iter()
            .map(|p| -> Result<Value> {
                Ok(json!({
                    "id": p.id,
                    "vector": {
                        DENSE_VECTOR: p.vector,
                        SPARSE_VECTOR: sparse_json(&p.sparse),
                    },
                    "payload": serde_json::to_value(&p.payload)
                        .map_err(|e| CmdexError::Other(e.into()))?,
                }))
            })
            .collect::<Result<_>>()?;
        let body = json!({ "points": wire });
        let url = self.collection_url("/points?wait=true");
        debug!(count = points.len(), "qdrant upsert");
        self.call("qdrant upsert", Method::PUT, &url, Some(&body))
            .await?;
        Ok(())
    }

    async fn delete_by_filter(&self, _token: &WriteToken, filter: &IndexFilter) -> Result<()> {
        reject_unrestricted(filter)?;
        let Some(f) = filter_json(filter) else {
            return Ok(());
        };
        let body = json!({ "filter": f });
        let url = self.collection_url("/points/delete?wait=true");
        self.call("qdrant delete", Method::POST, &url, Some(&body))
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        filter: &IndexFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let named = json!({ "name": DENSE_VECTOR, "vector": vector });
        self.query(named, filter, top_k).await
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
        let named = json!({ "name": SPARSE_VECTOR, "vector": sparse_json(terms) });
        self.query(named, filter, top_k).await
    }

    async fn reset_collection(&self, _token: &WriteToken) -> Result<()> {
        let url = self.collection_url("");
        self.retry
            .run("qdrant delete collection", || async {
                let (status, text) = self.send(Method::DELETE, &url, None).await?;
                if status.is_success() || status == StatusCode::NOT_FOUND {
                    Ok(())
                } else {
                    Err(status_error("qdrant", status, &text))
                }
            })
            .await?;
        info!(collection = %self.collection, "dropped qdrant collection");
        self.create_collection().await
    }

    async fn stats(&self) -> Result<CollectionStats> {
        let info = self.collection_info().await?.ok_or_else(|| {
            CmdexError::PermanentConfig(format!("collection {} does not exist", self.collection))
        })?;
        Ok(CollectionStats {
            vector_count: info.points_count.or(info.vectors_count).unwrap_or(0),
            collection_status: info.status,
            disk_usage: None,
            ram_usage: None,
        })
    }
}
