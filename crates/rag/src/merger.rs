use std::collections::HashSet;
use std::sync::Arc;

use qbank_index::{ScoredResult, VectorBackend};
use serde::Serialize;
use tracing::debug;

pub const PREVIEW_CHARS: usize = 800;

#[derive(Clone, Default)]
pub struct RetrievalMerger {
    backends: Vec<Arc<dyn VectorBackend>>,
}

impl RetrievalMerger {
    pub fn new(backends: Vec<Arc<dyn VectorBackend>>) -> Self {
        Self { backends }
    }

    pub fn backends(&self) -> &[Arc<dyn VectorBackend>] {
        &self.backends
    }

    /// Each backend is asked for `top_k` hits. An empty `allowed_sources`
    /// filter is treated the same as no filter.
    pub fn retrieve(
        &self,
        vector: &[f32],
        top_k: usize,
        allowed_sources: Option<&[String]>,
    ) -> Vec<ScoredResult> {
        if top_k == 0 {
            return Vec::new();
        }
        let mut batches = Vec::with_capacity(self.backends.len());
        for backend in &self.backends {
            if !backend.available() {
                debug!(backend = backend.name(), "backend unavailable, skipping");
                continue;
            }
            batches.push(backend.query(vector, top_k));
        }
        merge_hits(batches, top_k, allowed_sources)
    }
}

/// Filter, de-duplicate by identity signature (first occurrence wins), sort by
/// descending score and keep the best `top_k`.
pub fn merge_hits(
    batches: Vec<Vec<ScoredResult>>,
    top_k: usize,
    allowed_sources: Option<&[String]>,
) -> Vec<ScoredResult> {
    let allowed: Option<HashSet<&str>> = allowed_sources
        .filter(|sources| !sources.is_empty())
        .map(|sources| sources.iter().map(String::as_str).collect());
    let mut seen = HashSet::new();
    let mut merged: Vec<ScoredResult> = batches
        .into_iter()
        .flatten()
        .filter(|hit| match &allowed {
            Some(allowed) => allowed.contains(hit.metadata.source_id.as_str()),
            None => true,
        })
        .filter(|hit| seen.insert(hit.metadata.identity_signature()))
        .collect();
    // stable sort keeps first-seen order among equal scores
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    merged.truncate(top_k);
    merged
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passage {
    pub source_id: String,
    pub label: String,
    pub page_no: Option<u32>,
    pub score: f64,
    pub excerpt: String,
}

impl Passage {
    pub fn from_hit(hit: &ScoredResult) -> Self {
        Self {
            source_id: hit.metadata.source_id.clone(),
            label: hit.metadata.label.clone(),
            page_no: hit.metadata.position,
            score: hit.score,
            excerpt: hit.metadata.excerpt.clone(),
        }
    }

    pub fn excerpt_preview(&self, max_chars: usize) -> String {
        match self.excerpt.char_indices().nth(max_chars) {
            Some((cut, _)) => format!("{}…", &self.excerpt[..cut]),
            None => self.excerpt.clone(),
        }
    }

    pub fn preview(mut self, max_chars: usize) -> Self {
        self.excerpt = self.excerpt_preview(max_chars);
        self
    }
}
