use async_trait::async_trait;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::{check_vectors, Embedder};
use crate::config::EmbeddingConfig;
use crate::error::{status_error, CmdexError, Result};
use crate::retry::RetryPolicy;

/// Wire format spoken by the embedding service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Service,
    Ollama,
    OpenAi,
}

impl Dialect {
    fn default_url(&self) -> Option<&'static str> {
        match self {
            Dialect::Service => None,
            Dialect::Ollama => Some("http://localhost:11434"),
            Dialect::OpenAi => Some("https://api.openai.com"),
        }
    }

    fn path(&self) -> &'static str {
        match self {
            Dialect::Service => "/embed",
            Dialect::Ollama => "/api/embed",
            Dialect::OpenAi => "/v1/embeddings",
        }
    }
}

impl FromStr for Dialect {
    type Err = CmdexError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "service" => Ok(Dialect::Service),
            "ollama" => Ok(Dialect::Ollama),
            "openai" => Ok(Dialect::OpenAi),
            other => Err(CmdexError::PermanentConfig(format!(
                "unknown embedding provider: {}",
                other
            ))),
        }
    }
}

/// Batched HTTP embedding client.
pub struct HttpEmbedder {
    client: reqwest::Client,
    dialect: Dialect,
    endpoint: String,
    model: String,
    dims: usize,
    batch_size: usize,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig, dialect: Dialect, retry: RetryPolicy) -> Result<Self> {
        let base = config
            .url
            .as_deref()
            .or(dialect.default_url())
            .ok_or_else(|| {
                CmdexError::PermanentConfig("embedding.url required for the service provider".into())
            })?
            .trim_end_matches('/');

        let api_key = match dialect {
            Dialect::OpenAi => Some(std::env::var("OPENAI_API_KEY").map_err(|_| {
                CmdexError::PermanentConfig("OPENAI_API_KEY not set".into())
            })?),
            _ => None,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CmdexError::PermanentConfig(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            dialect,
            endpoint: format!("{}{}", base, dialect.path()),
            model: config.model.clone(),
            dims: config.dims,
            batch_size: config.batch_size.max(1),
            api_key,
            retry,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = match self.dialect {
            Dialect::Service => serde_json::json!({ "texts": texts }),
            Dialect::Ollama | Dialect::OpenAi => serde_json::json!({
                "model": self.model,
                "input": texts,
            }),
        };

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(status_error("embedding service", status, &body_text));
        }

        let vectors = match self.dialect {
            Dialect::Service => response.json::<ServiceResponse>().await?.vectors,
            Dialect::Ollama => response.json::<OllamaResponse>().await?.embeddings,
            Dialect::OpenAi => {
                let mut data = response.json::<OpenAiResponse>().await?.data;
                data.sort_by_key(|d| d.index);
                data.into_iter().map(|d| d.embedding).collect()
            }
        };

        check_vectors(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

#[derive(Deserialize)]
struct ServiceResponse {
    vectors: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(endpoint = %self.endpoint, count = batch.len(), "embedding batch");
            let vectors = self.retry.run("embed", || self.request(batch)).await?;
            out.extend(vectors);
        }
        Ok(out)
    }
}
