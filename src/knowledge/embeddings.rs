use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::KnowledgeError;
use crate::ai::LlmError;
use crate::config::{Config, EmbeddingBackend};
use crate::retry::{with_retries, RetryPolicy};

const OPENAI_BASE_URL: &str = "https://api.openai.com";

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, KnowledgeError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KnowledgeError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Offline embedder: signed feature hashing of words and word pairs, L2-normalised.
/// Identical text always maps to the identical vector.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let hash = fnv1a(feature.as_bytes());
        let slot = (hash % self.dimension as u64) as usize;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        vector[slot] += sign * weight;
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();

        for token in &tokens {
            self.add_feature(&mut vector, token, 1.0);
        }
        for pair in tokens.windows(2) {
            self.add_feature(&mut vector, &format!("{} {}", pair[0], pair[1]), 0.5);
        }

        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, KnowledgeError> {
        Ok(self.vectorize(text))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

pub(crate) fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// OpenAI embeddings endpoint.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    dimension: usize,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            dimension,
            retry: RetryPolicy::new(3, Duration::from_millis(500)),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let mut body = json!({ "model": &self.model, "input": texts });
        if self.model.starts_with("text-embedding-3") {
            body["dimensions"] = json!(self.dimension);
        }
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| LlmError::ServiceError(format!("invalid API key: {}", e)))?;

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .header(AUTHORIZATION, auth)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(LlmError::ServiceUnavailable(format!("status {}", status)));
        }
        if !status.is_success() {
            return Err(LlmError::ServiceError(format!("status {}", status)));
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, KnowledgeError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| KnowledgeError::Embedding("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KnowledgeError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = texts.len(), model = %self.model, "requesting embeddings");
        let vectors = with_retries(&self.retry, LlmError::is_transient, || self.request(texts))
            .await
            .map_err(|e| KnowledgeError::Embedding(e.to_string()))?;

        if vectors.len() != texts.len() {
            return Err(KnowledgeError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(KnowledgeError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        Ok(vectors)
    }
}

/// The configured embedder; falls back to hashing when no OpenAI key is available.
pub fn from_config(config: &Config) -> Arc<dyn Embedder> {
    let knowledge = &config.knowledge;
    match (knowledge.embedding, config.ai.openai_api_key.as_deref()) {
        (EmbeddingBackend::OpenAI, Some(key)) if !key.trim().is_empty() => Arc::new(
            OpenAiEmbedder::new(key, knowledge.embedding_model.clone(), knowledge.dimension),
        ),
        (EmbeddingBackend::OpenAI, _) => {
            warn!("OpenAI embeddings requested without OPENAI_API_KEY, using hashing embedder");
            Arc::new(HashingEmbedder::new(knowledge.dimension))
        }
        (EmbeddingBackend::Hashing, _) => Arc::new(HashingEmbedder::new(knowledge.dimension)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[tokio::test]
    async fn hashing_is_deterministic_and_normalised() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("No module named requests").await.unwrap();
        let b = embedder.embed("No module named requests").await.unwrap();

        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn similar_text_scores_higher() {
        let embedder = HashingEmbedder::new(256);
        let query = embedder.embed("pip install requests module missing").await.unwrap();
        let close = embedder.embed("install the requests module with pip").await.unwrap();
        let far = embedder.embed("git push rejected by remote").await.unwrap();

        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[tokio::test]
    async fn empty_text_is_a_zero_vector() {
        let embedder = HashingEmbedder::new(16);
        let v = embedder.embed("   ").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
        assert_eq!(cosine_similarity(&v, &v), 0.0);
    }

    #[tokio::test]
    async fn openai_embedder_orders_by_index() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/embeddings")
            .match_header("authorization", "Bearer key")
            .with_status(200)
            .with_body(
                json!({
                    "data": [
                        { "index": 1, "embedding": [0.0, 1.0] },
                        { "index": 0, "embedding": [1.0, 0.0] }
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let embedder = OpenAiEmbedder::new("key", "text-embedding-3-small", 2).with_base_url(server.url());
        let vectors = embedder
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn openai_embedder_gives_up_after_retries() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/embeddings")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let embedder = OpenAiEmbedder::new("key", "text-embedding-3-small", 2)
            .with_base_url(server.url())
            .with_retry_policy(RetryPolicy::new(2, Duration::from_millis(1)));

        assert!(matches!(
            embedder.embed("a").await,
            Err(KnowledgeError::Embedding(_))
        ));
        mock.assert_async().await;
    }
}
