use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use cmdex::config::{EmbeddingConfig, IndexConfig};
use cmdex::embedding::{Dialect, Embedder, HttpEmbedder};
use cmdex::error::CmdexError;
use cmdex::index::{IndexClient, IndexFilter, QdrantIndex, WriteLock};
use cmdex::models::Version;
use cmdex::retry::RetryPolicy;

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
    }
}

fn texts(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("text {}", i)).collect()
}

/// Answers `/embed` with one `dims`-long vector per input text.
struct EchoVectors {
    dims: usize,
}

impl Respond for EchoVectors {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let n = body["texts"].as_array().unwrap().len();
        let vectors: Vec<Vec<f32>> = (0..n).map(|i| vec![i as f32; self.dims]).collect();
        ResponseTemplate::new(200).set_body_json(json!({ "vectors": vectors }))
    }
}

fn embedding_config(url: &str, dims: usize, batch_size: usize) -> EmbeddingConfig {
    EmbeddingConfig {
        url: Some(url.to_string()),
        dims,
        batch_size,
        ..EmbeddingConfig::default()
    }
}

// ============ Embedding service ============

#[tokio::test]
async fn test_service_embedder_splits_batches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(EchoVectors { dims: 4 })
        .expect(2)
        .mount(&server)
        .await;

    let embedder = HttpEmbedder::new(
        &embedding_config(&server.uri(), 4, 2),
        Dialect::Service,
        fast_retry(),
    )
    .unwrap();
    let vectors = embedder.embed_batch(&texts(3)).await.unwrap();
    assert_eq!(vectors.len(), 3);
    assert!(vectors.iter().all(|v| v.len() == 4));
    // Second request restarts numbering.
    assert_eq!(vectors[2][0], 0.0);
    assert_eq!(vectors[1][0], 1.0);
}

#[tokio::test]
async fn test_service_embedder_retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(EchoVectors { dims: 4 })
        .expect(1)
        .mount(&server)
        .await;

    let embedder = HttpEmbedder::new(
        &embedding_config(&server.uri(), 4, 32),
        Dialect::Service,
        fast_retry(),
    )
    .unwrap();
    let vectors = embedder.embed_batch(&texts(2)).await.unwrap();
    assert_eq!(vectors.len(), 2);
}

#[tokio::test]
async fn test_service_embedder_gives_up_after_budget() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let embedder = HttpEmbedder::new(
        &embedding_config(&server.uri(), 4, 32),
        Dialect::Service,
        fast_retry(),
    )
    .unwrap();
    let err = embedder.embed_batch(&texts(1)).await.unwrap_err();
    assert!(matches!(err, CmdexError::TransientIo(_)));
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad input"))
        .expect(1)
        .mount(&server)
        .await;

    let embedder = HttpEmbedder::new(
        &embedding_config(&server.uri(), 4, 32),
        Dialect::Service,
        fast_retry(),
    )
    .unwrap();
    let err = embedder.embed_batch(&texts(1)).await.unwrap_err();
    assert!(matches!(err, CmdexError::PermanentConfig(_)));
    assert!(err.to_string().contains("bad input"));
}

#[tokio::test]
async fn test_dimension_mismatch_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(EchoVectors { dims: 8 })
        .expect(1)
        .mount(&server)
        .await;

    let embedder = HttpEmbedder::new(
        &embedding_config(&server.uri(), 4, 32),
        Dialect::Service,
        fast_retry(),
    )
    .unwrap();
    let err = embedder.embed_batch(&texts(2)).await.unwrap_err();
    assert!(matches!(err, CmdexError::PermanentConfig(_)));
}

#[tokio::test]
async fn test_ollama_dialect() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({ "model": "nomic-embed-text" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[0.1, 0.2, 0.3]] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = EmbeddingConfig {
        provider: "ollama".into(),
        model: "nomic-embed-text".into(),
        ..embedding_config(&server.uri(), 3, 32)
    };
    let embedder = HttpEmbedder::new(&config, Dialect::Ollama, fast_retry()).unwrap();
    let vectors = embedder.embed_batch(&texts(1)).await.unwrap();
    assert_eq!(vectors, vec![vec![0.1, 0.2, 0.3]]);
}

// ============ Qdrant ============

fn qdrant(server: &MockServer, dims: usize) -> QdrantIndex {
    let config = IndexConfig {
        url: server.uri(),
        api_key: Some("secret".into()),
        collection: "commands".into(),
        ..IndexConfig::default()
    };
    QdrantIndex::new(&config, dims, fast_retry()).unwrap()
}

fn collection_body(size: u64) -> Value {
    json!({
        "result": {
            "status": "green",
            "points_count": 12,
            "config": { "params": { "vectors": { "dense": { "size": size, "distance": "Cosine" } } } }
        },
        "status": "ok"
    })
}

#[tokio::test]
async fn test_ensure_collection_creates_missing_collection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collections/commands"))
        .and(header("api-key", "secret"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/collections/commands"))
        .and(header("api-key", "secret"))
        .and(body_partial_json(json!({
            "vectors": { "dense": { "size": 384, "distance": "Cosine" } },
            "sparse_vectors": { "text": { "modifier": "idf" } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": true })))
        .expect(1)
        .mount(&server)
        .await;

    let index = qdrant(&server, 384);
    let token = WriteLock::new().try_acquire().unwrap();
    assert!(index.ensure_collection(&token).await.unwrap());
}

#[tokio::test]
async fn test_ensure_collection_keeps_matching_collection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collections/commands"))
        .respond_with(ResponseTemplate::new(200).set_body_json(collection_body(384)))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/collections/commands"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": true })))
        .expect(0)
        .mount(&server)
        .await;

    let index = qdrant(&server, 384);
    let token = WriteLock::new().try_acquire().unwrap();
    assert!(!index.ensure_collection(&token).await.unwrap());
}

#[tokio::test]
async fn test_ensure_collection_rejects_dimension_mismatch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collections/commands"))
        .respond_with(ResponseTemplate::new(200).set_body_json(collection_body(768)))
        .mount(&server)
        .await;

    let index = qdrant(&server, 384);
    let token = WriteLock::new().try_acquire().unwrap();
    let err = index.ensure_collection(&token).await.unwrap_err();
    assert!(matches!(err, CmdexError::PermanentConfig(_)));
    assert!(err.to_string().contains("768"));
}

#[tokio::test]
async fn test_search_parses_hits_and_skips_bad_payloads() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/collections/commands/points/search"))
        .and(body_partial_json(json!({
            "vector": { "name": "dense" },
            "with_payload": true,
            "limit": 5
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [
                {
                    "id": "6f1c0000-0000-5000-8000-000000000001",
                    "score": 0.91,
                    "payload": {
                        "entityType": "Command",
                        "commandId": 1,
                        "version": 3,
                        "name": "Show-InstallationPrompt",
                        "synopsis": "Show a prompt.",
                        "isDeprecated": false
                    }
                },
                { "id": 7, "score": 0.5, "payload": { "unexpected": true } }
            ],
            "status": "ok"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let index = qdrant(&server, 3);
    let filter = IndexFilter {
        version: Some(Version::V3),
        include_deprecated: false,
        ..IndexFilter::default()
    };
    let hits = index.search(&[0.1, 0.2, 0.3], &filter, 5).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "6f1c0000-0000-5000-8000-000000000001");
    assert!((hits[0].score - 0.91).abs() < 1e-9);
    assert_eq!(hits[0].payload.title(), "Show-InstallationPrompt");
}

#[tokio::test]
async fn test_unrestricted_delete_is_refused_locally() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/collections/commands/points/delete"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let index = qdrant(&server, 3);
    let token = WriteLock::new().try_acquire().unwrap();
    let err = index
        .delete_by_filter(&token, &IndexFilter::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CmdexError::PermanentConfig(_)));
}

#[tokio::test]
async fn test_stats_reads_point_count() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collections/commands"))
        .respond_with(ResponseTemplate::new(200).set_body_json(collection_body(384)))
        .mount(&server)
        .await;

    let stats = qdrant(&server, 384).stats().await.unwrap();
    assert_eq!(stats.vector_count, 12);
    assert_eq!(stats.collection_status, "green");
    assert!(stats.disk_usage.is_none());
}

#[tokio::test]
async fn test_reset_tolerates_missing_collection() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/collections/commands"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/collections/commands"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": true })))
        .expect(1)
        .mount(&server)
        .await;

    let index = qdrant(&server, 384);
    let token = WriteLock::new().try_acquire().unwrap();
    index.reset_collection(&token).await.unwrap();
}
