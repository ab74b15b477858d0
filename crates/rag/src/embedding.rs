use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use rand::Rng;
use reqwest::blocking::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

pub const DEFAULT_HASH_DIMENSIONS: usize = 32;
pub const DEFAULT_GEMINI_EMBED_MODEL: &str = "text-embedding-004";

/// Turns text into vectors. Infallible: implementations degrade to a
/// deterministic fallback instead of surfacing errors to retrieval.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    fn embed(&self, texts: &[String]) -> Vec<Vec<f32>>;

    fn embed_one(&self, text: &str) -> Vec<f32> {
        self.embed(&[text.to_string()]).pop().unwrap_or_default()
    }
}

/// Deterministic SHA-256 embedding. Equal inputs always yield equal vectors,
/// every component lies in `[0, 1]`.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dimensions);
        let mut block: u32 = 0;
        while out.len() < self.dimensions {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            if block > 0 {
                hasher.update(block.to_le_bytes());
            }
            for byte in hasher.finalize() {
                if out.len() == self.dimensions {
                    break;
                }
                out.push(f32::from(byte) / 255.0);
            }
            block += 1;
        }
        out
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_DIMENSIONS)
    }
}

impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts.iter().map(|text| self.embed_text(text)).collect()
    }
}

pub trait RemoteEmbedding: Send + Sync {
    fn name(&self) -> &str;

    fn embed_remote(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl RetryPolicy {
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(10);
        let backoff = self.base_delay.saturating_mul(1u32 << exp);
        let jitter_ms = self.max_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return backoff;
        }
        let jitter = rand::thread_rng().gen_range(0..jitter_ms);
        backoff + Duration::from_millis(jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_jitter: Duration::from_millis(100),
        }
    }
}

#[derive(Clone)]
pub enum EmbeddingBackend {
    Hash,
    Remote(Arc<dyn RemoteEmbedding>),
}

#[derive(Clone)]
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
    fallback: HashEmbedder,
    retry: RetryPolicy,
}

impl EmbeddingClient {
    pub fn hash(dimensions: usize) -> Self {
        Self {
            backend: EmbeddingBackend::Hash,
            fallback: HashEmbedder::new(dimensions),
            retry: RetryPolicy::default(),
        }
    }

    pub fn remote(remote: Arc<dyn RemoteEmbedding>, fallback_dimensions: usize) -> Self {
        Self {
            backend: EmbeddingBackend::Remote(remote),
            fallback: HashEmbedder::new(fallback_dimensions),
            retry: RetryPolicy::default(),
        }
    }

    pub fn gemini(model: &str, timeout: Duration, fallback_dimensions: usize) -> Result<Self> {
        let client = GeminiEmbeddingClient::new(model, timeout)?;
        Ok(Self::remote(Arc::new(client), fallback_dimensions))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn backend_name(&self) -> &str {
        match &self.backend {
            EmbeddingBackend::Hash => "hash",
            EmbeddingBackend::Remote(remote) => remote.name(),
        }
    }

    fn embed_with_retry(&self, remote: &dyn RemoteEmbedding, text: &str) -> Vec<f32> {
        let attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=attempts {
            match remote.embed_remote(text) {
                Ok(vector) if !vector.is_empty() => return vector,
                Ok(_) => warn!(provider = remote.name(), attempt, "empty embedding returned"),
                Err(err) => warn!(provider = remote.name(), attempt, error = %err, "embedding call failed"),
            }
            if attempt < attempts {
                thread::sleep(self.retry.delay_for(attempt));
            }
        }
        debug!(provider = remote.name(), "falling back to hash embedding");
        self.fallback.embed_text(text)
    }
}

impl Embedder for EmbeddingClient {
    fn dimension(&self) -> usize {
        self.fallback.dimension()
    }

    fn embed(&self, texts: &[String]) -> Vec<Vec<f32>> {
        match &self.backend {
            EmbeddingBackend::Hash => self.fallback.embed(texts),
            EmbeddingBackend::Remote(remote) => texts
                .iter()
                .map(|text| self.embed_with_retry(remote.as_ref(), text))
                .collect(),
        }
    }
}

pub struct GeminiEmbeddingClient {
    http: Client,
    model: String,
    api_key: String,
}

impl GeminiEmbeddingClient {
    pub fn new(model: &str, timeout: Duration) -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_API_KEY"))
            .map_err(|_| anyhow!("GEMINI_API_KEY is required for gemini embeddings"))?;
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            model: model.trim_start_matches("models/").to_string(),
            api_key,
        })
    }
}

impl RemoteEmbedding for GeminiEmbeddingClient {
    fn name(&self) -> &str {
        "gemini"
    }

    fn embed_remote(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:embedContent",
            self.model
        );
        let payload = serde_json::json!({
            "model": format!("models/{}", self.model),
            "content": { "parts": [{ "text": text }] },
        });
        let response = self
            .http
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "gemini embeddings request failed: {}",
                response.status()
            ));
        }
        let parsed: GeminiEmbeddingResponse = response.json()?;
        Ok(parsed.embedding.values)
    }
}

#[derive(Deserialize)]
struct GeminiEmbeddingResponse {
    embedding: GeminiEmbeddingValues,
}

#[derive(Deserialize)]
struct GeminiEmbeddingValues {
    values: Vec<f32>,
}
