//! Embedding capability: turns text into fixed-length vectors.
//!
//! Remote adapters (Ollama, OpenAI-compatible) run through the shared [`RetryPolicy`]. The
//! deterministic [`HashEmbeddingClient`] needs no network and backs offline runs and tests.

use crate::config::{Config, EmbeddingProvider};
use crate::metrics::CapabilityHealth;
use crate::resilience::{CapabilityError, RetryPolicy, decode_json, http_client};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce one vector per input text, in input order.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, CapabilityError>;

    /// Model identifier reported in introspection.
    fn model(&self) -> &str;

    /// Dimensionality of produced vectors.
    fn dimension(&self) -> usize;
}

/// Build the embedding client selected by configuration.
pub fn build_embedding_client(
    config: &Config,
) -> Result<Arc<dyn EmbeddingClient>, CapabilityError> {
    let settings = &config.embedding;
    let client: Arc<dyn EmbeddingClient> = match settings.provider {
        EmbeddingProvider::Hash => Arc::new(HashEmbeddingClient::new(settings.dimension)),
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbeddingClient::new(
            config.ollama_url.clone(),
            settings.model.clone(),
            settings.dimension,
            config.resilience,
        )?),
        EmbeddingProvider::OpenAI => {
            let api_key = config.openai.api_key.clone().ok_or_else(|| {
                CapabilityError::NotConfigured("OPENAI_API_KEY is not set".into())
            })?;
            Arc::new(OpenAiEmbeddingClient::new(
                config.openai.base_url.clone(),
                api_key,
                settings.model.clone(),
                settings.dimension,
                config.resilience,
            )?)
        }
    };
    tracing::info!(
        provider = ?settings.provider,
        model = client.model(),
        dimension = client.dimension(),
        "Embedding client initialized"
    );
    Ok(client)
}

/// Wraps an embedding client and records the outcome of every call.
pub struct TrackedEmbeddingClient {
    inner: Arc<dyn EmbeddingClient>,
    health: Arc<CapabilityHealth>,
}

impl TrackedEmbeddingClient {
    /// Track `inner` into `health`.
    pub fn new(inner: Arc<dyn EmbeddingClient>, health: Arc<CapabilityHealth>) -> Self {
        Self { inner, health }
    }
}

#[async_trait]
impl EmbeddingClient for TrackedEmbeddingClient {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, CapabilityError> {
        let result = self.inner.embed(texts).await;
        self.health.record(result.is_ok());
        result
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

fn check_vectors(
    vectors: Vec<Vec<f32>>,
    expected_count: usize,
    dimension: usize,
) -> Result<Vec<Vec<f32>>, CapabilityError> {
    if vectors.len() != expected_count {
        return Err(CapabilityError::InvalidResponse(format!(
            "expected {expected_count} embeddings, got {}",
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|vector| vector.len() != dimension) {
        return Err(CapabilityError::InvalidResponse(format!(
            "embedding dimension mismatch: expected {dimension}, got {}",
            bad.len()
        )));
    }
    Ok(vectors)
}

/// Ollama `/api/embed` adapter.
pub struct OllamaEmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
    dimension: usize,
    policy: RetryPolicy,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbeddingClient {
    /// Create an adapter for the Ollama runtime at `base_url`.
    pub fn new(
        base_url: String,
        model: String,
        dimension: usize,
        policy: RetryPolicy,
    ) -> Result<Self, CapabilityError> {
        Ok(Self {
            http: http_client("carelens/embedding")?,
            base_url,
            model,
            dimension,
            policy,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embed", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, CapabilityError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();
        let payload = json!({ "model": self.model, "input": texts });
        let body: OllamaEmbedResponse = self
            .policy
            .run("ollama.embed", || async {
                let response = self
                    .http
                    .post(self.endpoint())
                    .json(&payload)
                    .send()
                    .await
                    .map_err(CapabilityError::from_transport)?;
                decode_json(response).await
            })
            .await?;
        check_vectors(body.embeddings, expected, self.dimension)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// OpenAI-compatible `/v1/embeddings` adapter.
pub struct OpenAiEmbeddingClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
    policy: RetryPolicy,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingItem>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbeddingClient {
    /// Create an adapter for an OpenAI-compatible endpoint.
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        dimension: usize,
        policy: RetryPolicy,
    ) -> Result<Self, CapabilityError> {
        Ok(Self {
            http: http_client("carelens/embedding")?,
            base_url,
            api_key,
            model,
            dimension,
            policy,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, CapabilityError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();
        let payload = json!({ "model": self.model, "input": texts });
        let mut body: OpenAiEmbeddingResponse = self
            .policy
            .run("openai.embed", || async {
                let response = self
                    .http
                    .post(self.endpoint())
                    .bearer_auth(&self.api_key)
                    .json(&payload)
                    .send()
                    .await
                    .map_err(CapabilityError::from_transport)?;
                decode_json(response).await
            })
            .await?;
        body.data.sort_by_key(|item| item.index);
        let vectors = body.data.into_iter().map(|item| item.embedding).collect();
        check_vectors(vectors, expected, self.dimension)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic embedder that hashes bytes and word stems into vector slots.
#[derive(Debug, Clone)]
pub struct HashEmbeddingClient {
    dimension: usize,
}

impl HashEmbeddingClient {
    /// Create a hashing embedder producing `dimension`-sized vectors.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Encode a single text into a unit-length vector.
    pub fn encode(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
        {
            let lowered = word.to_lowercase();
            let slot = fnv1a(lowered.as_bytes()) as usize % self.dimension;
            embedding[slot] += 1.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }
        embedding
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[async_trait]
impl EmbeddingClient for HashEmbeddingClient {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, CapabilityError> {
        Ok(texts.iter().map(|text| self.encode(text)).collect())
    }

    fn model(&self) -> &str {
        "hash"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use std::time::Duration;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            timeout: Duration::from_secs(5),
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn hash_embeddings_are_deterministic_and_normalized() {
        let client = HashEmbeddingClient::new(32);
        let first = client
            .embed(vec!["Wait time is 45 minutes".into()])
            .await
            .expect("embed");
        let second = client
            .embed(vec!["wait TIME is 45 minutes".into()])
            .await
            .expect("embed");
        assert_eq!(first, second);
        let norm: f32 = first[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn hash_embedding_of_empty_text_is_zero_vector() {
        let client = HashEmbeddingClient::new(8);
        let vectors = client.embed(vec![String::new()]).await.expect("embed");
        assert!(vectors[0].iter().all(|value| *value == 0.0));
    }

    #[tokio::test]
    async fn ollama_client_decodes_embeddings() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/embed")
                    .json_body_partial(r#"{"model":"nomic-embed-text"}"#);
                then.status(200)
                    .json_body(json!({ "embeddings": [[0.1, 0.2, 0.3], [0.3, 0.2, 0.1]] }));
            })
            .await;
        let client = OllamaEmbeddingClient::new(
            server.base_url(),
            "nomic-embed-text".into(),
            3,
            fast_policy(),
        )
        .expect("client");

        let vectors = client
            .embed(vec!["a".into(), "b".into()])
            .await
            .expect("embeddings");

        mock.assert_async().await;
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1], vec![0.3, 0.2, 0.1]);
    }

    #[tokio::test]
    async fn ollama_client_rejects_dimension_mismatch() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(200).json_body(json!({ "embeddings": [[0.1, 0.2]] }));
            })
            .await;
        let client =
            OllamaEmbeddingClient::new(server.base_url(), "m".into(), 3, fast_policy())
                .expect("client");

        let error = client.embed(vec!["a".into()]).await.unwrap_err();
        assert!(matches!(error, CapabilityError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn openai_client_orders_by_index_and_sends_bearer() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/embeddings")
                    .header("authorization", "Bearer sk-test");
                then.status(200).json_body(json!({
                    "data": [
                        { "index": 1, "embedding": [0.0, 1.0] },
                        { "index": 0, "embedding": [1.0, 0.0] }
                    ]
                }));
            })
            .await;
        let client = OpenAiEmbeddingClient::new(
            server.base_url(),
            "sk-test".into(),
            "text-embedding-3-small".into(),
            2,
            fast_policy(),
        )
        .expect("client");

        let vectors = client
            .embed(vec!["first".into(), "second".into()])
            .await
            .expect("embeddings");

        mock.assert_async().await;
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn openai_client_does_not_retry_unauthorized() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(401).body("invalid api key");
            })
            .await;
        let client = OpenAiEmbeddingClient::new(
            server.base_url(),
            "bad".into(),
            "m".into(),
            2,
            fast_policy(),
        )
        .expect("client");

        let error = client.embed(vec!["x".into()]).await.unwrap_err();

        assert!(matches!(error, CapabilityError::Unauthorized(_)));
        assert_eq!(mock.hits_async().await, 1);
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(503).body("loading model");
            })
            .await;
        let client =
            OllamaEmbeddingClient::new(server.base_url(), "m".into(), 2, fast_policy())
                .expect("client");

        let error = client.embed(vec!["x".into()]).await.unwrap_err();

        assert!(error.is_retryable());
        assert_eq!(mock.hits_async().await, 3);
    }
}
