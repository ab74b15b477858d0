use std::sync::Arc;

use qbank_index::ScoredResult;
use qbank_llm::TextGenerator;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::embedding::Embedder;
use crate::merger::RetrievalMerger;
use crate::prompt;
use crate::schema::GenerationResult;
use crate::validator::{self, ValidationError};

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_TOP_K: usize = 6;

pub const FALLBACK_QUESTION_ID: &str = "NA";

#[derive(Debug, Clone, Copy)]
pub struct GeneratorSettings {
    pub max_attempts: usize,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Generation {
    pub result: GenerationResult,
    pub passages: Vec<ScoredResult>,
    pub raw: String,
    pub error: Option<String>,
    pub attempts: usize,
}

impl Generation {
    pub fn retrieval_scores(&self) -> Vec<f64> {
        self.passages.iter().map(|hit| hit.score).collect()
    }
}

/// Retrieval, prompting and validation with a bounded number of model calls.
pub struct StrictGenerator {
    embedder: Arc<dyn Embedder>,
    merger: RetrievalMerger,
    text: Arc<dyn TextGenerator>,
    settings: GeneratorSettings,
}

impl StrictGenerator {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        merger: RetrievalMerger,
        text: Arc<dyn TextGenerator>,
    ) -> Self {
        Self {
            embedder,
            merger,
            text,
            settings: GeneratorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: GeneratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn merger(&self) -> &RetrievalMerger {
        &self.merger
    }

    pub fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        allowed_sources: Option<&[String]>,
    ) -> Vec<ScoredResult> {
        let vector = self.embedder.embed_one(query);
        self.merger.retrieve(&vector, top_k, allowed_sources)
    }

    pub fn generate(
        &self,
        task: &str,
        marks: i64,
        top_k: usize,
        allowed_sources: Option<&[String]>,
    ) -> Generation {
        let passages = self.retrieve(task, top_k, allowed_sources);
        let base_prompt = prompt::build_prompt(&passages, task, marks);
        let max_attempts = self.settings.max_attempts.max(1);

        let mut last_object: Option<Map<String, Value>> = None;
        let mut last_error: Option<ValidationError> = None;
        let mut raw = String::new();

        for attempt in 0..max_attempts {
            let prompt = if attempt == 0 {
                base_prompt.clone()
            } else {
                prompt::with_retry_notice(&base_prompt, attempt)
            };
            raw = self.text.generate_text(&prompt);
            let parsed = match validator::parse_object(&raw) {
                Ok(parsed) => parsed,
                Err(err) => {
                    debug!(attempt = attempt + 1, error = %err, "model output rejected");
                    last_error = Some(err);
                    continue;
                }
            };
            match validator::validate_object(&parsed.object) {
                Ok(mut result) => {
                    validator::backfill_page_references(&mut result, &passages);
                    info!(
                        attempt = attempt + 1,
                        status = result.status.as_str(),
                        passages = passages.len(),
                        "question generated"
                    );
                    return Generation {
                        result,
                        passages,
                        raw: parsed.text,
                        error: None,
                        attempts: attempt + 1,
                    };
                }
                Err(err) => {
                    debug!(attempt = attempt + 1, error = %err, "model output rejected");
                    last_error = Some(err);
                    last_object = Some(parsed.object);
                }
            }
        }

        let question_id = last_object
            .as_ref()
            .and_then(|object| object.get("question_id"))
            .and_then(Value::as_str)
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(FALLBACK_QUESTION_ID)
            .to_string();
        let error = last_error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "no model output".to_string());
        warn!(attempts = max_attempts, error = %error, "falling back to NOT_FOUND");
        Generation {
            result: validator::not_found(task, marks, question_id),
            passages,
            raw,
            error: Some(error),
            attempts: max_attempts,
        }
    }
}
