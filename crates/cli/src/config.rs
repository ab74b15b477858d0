use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use qbank_llm::LlmProvider;
use qbank_rag::JobRequest;
use serde::Deserialize;

const DEFAULT_DATA_DIR: &str = "storage";
const DEFAULT_TOP_K: usize = 6;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_DEDUP_THRESHOLD: f64 = 0.9;
const DEFAULT_ATTEMPT_MULTIPLIER: usize = 5;
const DEFAULT_HASH_DIMENSIONS: usize = 32;
const DEFAULT_EMBED_MODEL: &str = "text-embedding-004";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedProvider {
    Hash,
    Gemini,
}

#[derive(Debug, Clone)]
pub struct QbankConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub embed_provider: EmbedProvider,
    pub embed_model: String,
    pub data_dir: PathBuf,
    pub top_k: usize,
    pub timeout: Duration,
    pub daily_call_limit: u32,
    pub dedup_threshold: f64,
    pub attempt_multiplier: usize,
    pub hash_dimensions: usize,
}

impl QbankConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider_name = lookup("QBANK_PROVIDER").unwrap_or_else(|| "local".to_string());
        let provider = LlmProvider::from_str(provider_name.trim())
            .ok_or_else(|| anyhow!("unknown provider {provider_name}"))?;
        let model = lookup("QBANK_MODEL").unwrap_or_else(|| provider.default_model().to_string());
        let embed_provider = match lookup("QBANK_EMBED_PROVIDER")
            .unwrap_or_else(|| "hash".to_string())
            .trim()
            .to_lowercase()
            .as_str()
        {
            "hash" => EmbedProvider::Hash,
            "gemini" | "google" => EmbedProvider::Gemini,
            other => return Err(anyhow!("unknown embedding provider {other}")),
        };
        let embed_model =
            lookup("QBANK_EMBED_MODEL").unwrap_or_else(|| DEFAULT_EMBED_MODEL.to_string());
        let data_dir = lookup("QBANK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let timeout_secs = parse_or(&lookup, "QBANK_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;
        let dedup_threshold = parse_or(&lookup, "QBANK_DEDUP_THRESHOLD", DEFAULT_DEDUP_THRESHOLD)?;
        if !(0.0..=1.0).contains(&dedup_threshold) {
            return Err(anyhow!(
                "QBANK_DEDUP_THRESHOLD must be within [0, 1], got {dedup_threshold}"
            ));
        }
        Ok(Self {
            provider,
            model,
            embed_provider,
            embed_model,
            data_dir,
            top_k: parse_or(&lookup, "QBANK_TOP_K", DEFAULT_TOP_K)?,
            timeout: Duration::from_secs(timeout_secs),
            daily_call_limit: parse_or(&lookup, "QBANK_DAILY_CALL_LIMIT", 0)?,
            dedup_threshold,
            attempt_multiplier: parse_or(
                &lookup,
                "QBANK_ATTEMPT_MULTIPLIER",
                DEFAULT_ATTEMPT_MULTIPLIER,
            )?,
            hash_dimensions: parse_or(&lookup, "QBANK_HASH_EMBED_DIMENSIONS", DEFAULT_HASH_DIMENSIONS)?,
        })
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.data_dir.join("jobs")
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|err| anyhow!("invalid {key}={raw}: {err}")),
        _ => Ok(default),
    }
}

/// Batch job description read from TOML.
#[derive(Debug, Deserialize)]
pub struct JobFile {
    #[serde(default)]
    pub job_id: Option<String>,
    pub counts: BTreeMap<String, usize>,
    #[serde(default)]
    pub allowed_sources: Vec<String>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

impl JobFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read job file {}", path.display()))?;
        toml::from_str(&contents).map_err(|e| anyhow!("invalid job file: {e}"))
    }

    pub fn into_request(self, default_top_k: usize) -> Result<JobRequest> {
        if self.counts.is_empty() {
            return Err(anyhow!("job file must request at least one mark value"));
        }
        let mut counts = BTreeMap::new();
        for (mark, count) in self.counts {
            let value: i64 = mark
                .trim()
                .parse()
                .map_err(|_| anyhow!("mark value {mark:?} is not an integer"))?;
            counts.insert(value, count);
        }
        let job_id = self
            .job_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut request = JobRequest::new(job_id, counts);
        request.allowed_sources = self.allowed_sources;
        request.top_k = self.top_k.unwrap_or(default_top_k);
        Ok(request)
    }
}
