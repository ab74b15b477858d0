use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use qbank_index::{IndexedVectorIndex, VectorBackend, VectorIndex};
use qbank_llm::{LlmClient, LlmOptions};
use qbank_index::ScoredResult;
use qbank_rag::{
    BatchJobRunner, Embedder, EmbeddingClient, GeneratorSettings, JobSettings, RetrievalMerger,
    StrictGenerator,
};
use serde_json::{json, Value};
use tracing::info;

use crate::config::{EmbedProvider, QbankConfig};

/// Everything a command needs, opened from one configuration.
pub struct App {
    pub config: QbankConfig,
    pub flat: Arc<VectorIndex>,
    pub indexed: Arc<IndexedVectorIndex>,
    pub embedder: Arc<EmbeddingClient>,
}

impl App {
    pub fn open(config: QbankConfig) -> Result<Self> {
        let index_dir = config.index_dir();
        fs::create_dir_all(&index_dir)
            .with_context(|| format!("failed to create {}", index_dir.display()))?;
        let embedder = match config.embed_provider {
            EmbedProvider::Hash => EmbeddingClient::hash(config.hash_dimensions),
            EmbedProvider::Gemini => {
                EmbeddingClient::gemini(&config.embed_model, config.timeout, config.hash_dimensions)?
            }
        };
        info!(
            data_dir = %config.data_dir.display(),
            embedder = embedder.backend_name(),
            provider = config.provider.as_str(),
            "qbank opened"
        );
        Ok(Self {
            flat: Arc::new(VectorIndex::open(index_dir.join("vector_index.json"))),
            indexed: Arc::new(IndexedVectorIndex::open(index_dir.join("indexed_index.json"))),
            embedder: Arc::new(embedder),
            config,
        })
    }

    pub fn backends(&self) -> Vec<Arc<dyn VectorBackend>> {
        vec![
            self.flat.clone() as Arc<dyn VectorBackend>,
            self.indexed.clone() as Arc<dyn VectorBackend>,
        ]
    }

    /// Retrieval alone never needs a generation provider.
    pub fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        allowed_sources: Option<&[String]>,
    ) -> Vec<ScoredResult> {
        let vector = self.embedder.embed_one(query);
        RetrievalMerger::new(self.backends()).retrieve(&vector, top_k, allowed_sources)
    }

    pub fn generator(&self) -> Result<StrictGenerator> {
        let client = LlmClient::new(
            self.config.provider,
            self.config.model.clone(),
            LlmOptions {
                timeout: self.config.timeout,
                daily_limit: self.config.daily_call_limit,
            },
        )?;
        Ok(StrictGenerator::new(
            self.embedder.clone(),
            RetrievalMerger::new(self.backends()),
            Arc::new(client),
        )
        .with_settings(GeneratorSettings::default()))
    }

    pub fn runner(&self) -> Result<BatchJobRunner> {
        Ok(BatchJobRunner::new(Arc::new(self.generator()?)).with_settings(JobSettings {
            dedup_threshold: self.config.dedup_threshold,
            attempt_multiplier: self.config.attempt_multiplier,
        }))
    }

    pub fn stats(&self) -> Value {
        json!({
            "data_dir": self.config.data_dir.display().to_string(),
            "embedder": self.embedder.backend_name(),
            "backends": [
                {
                    "name": self.flat.name(),
                    "available": self.flat.available(),
                    "len": self.flat.len(),
                    "dimension": self.flat.dimension(),
                },
                {
                    "name": self.indexed.name(),
                    "available": self.indexed.available(),
                    "len": self.indexed.len(),
                    "dimension": self.indexed.dimension(),
                },
            ],
        })
    }
}
