use std::collections::HashSet;
use std::time::Duration;

use crate::metadata::{PassageMetadata, ScoredResult};

/// Result of a snapshot rewrite. Persistence is best effort: a failed write
/// never undoes the in-memory mutation, it is only reported here.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    Written { elapsed: Duration },
    Failed(String),
    Unchanged,
}

impl PersistOutcome {
    pub fn is_durable(&self) -> bool {
        !matches!(self, PersistOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddOutcome {
    pub inserted: usize,
    pub skipped: usize,
    pub persist: PersistOutcome,
}

impl AddOutcome {
    pub(crate) fn nothing(skipped: usize) -> Self {
        Self {
            inserted: 0,
            skipped,
            persist: PersistOutcome::Unchanged,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOutcome {
    pub removed: usize,
    pub persist: PersistOutcome,
}

/// Common contract of the brute-force and the indexed vector stores.
pub trait VectorBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// `false` means "skip this backend", never an error.
    fn available(&self) -> bool {
        true
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn add_batch(&self, vectors: Vec<Vec<f32>>, metadatas: Vec<PassageMetadata>) -> AddOutcome;

    fn add(&self, vector: Vec<f32>, metadata: PassageMetadata) -> AddOutcome {
        self.add_batch(vec![vector], vec![metadata])
    }

    fn query(&self, vector: &[f32], top_k: usize) -> Vec<ScoredResult>;

    /// Identity signatures of every held record.
    fn signatures(&self) -> HashSet<String>;

    fn delete_by_source(&self, source_id: &str) -> DeleteOutcome;
}

pub(crate) fn sort_descending(hits: &mut [ScoredResult]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
