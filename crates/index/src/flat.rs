use std::collections::HashSet;
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::{sort_descending, AddOutcome, DeleteOutcome, PersistOutcome, VectorBackend};
use crate::metadata::{PassageMetadata, ScoredResult, VectorRecord};
use crate::snapshot;

const NORM_FLOOR: f64 = 1e-9;
const BACKEND: &str = "flat";

#[derive(Default, Deserialize)]
struct FlatSnapshot {
    #[serde(default)]
    items: Vec<VectorRecord>,
}

#[derive(Serialize)]
struct FlatSnapshotRef<'a> {
    items: &'a [VectorRecord],
}

#[derive(Default)]
struct FlatState {
    records: Vec<VectorRecord>,
    dimension: Option<usize>,
}

impl FlatState {
    fn from_records(records: Vec<VectorRecord>) -> Self {
        let mut state = FlatState::default();
        let total = records.len();
        for record in records {
            if state.accepts(&record.vector) {
                state.dimension = Some(record.vector.len());
                state.records.push(record);
            }
        }
        if state.records.len() < total {
            warn!(
                backend = BACKEND,
                dropped = total - state.records.len(),
                "snapshot contained vectors of a foreign dimension"
            );
        }
        state
    }

    fn accepts(&self, vector: &[f32]) -> bool {
        !vector.is_empty() && self.dimension.map_or(true, |dim| dim == vector.len())
    }
}

/// Brute-force cosine index persisted as a single JSON snapshot.
///
/// The snapshot is read lazily on first access and fully rewritten after
/// every mutation. The in-memory records stay authoritative when a write
/// fails.
pub struct VectorIndex {
    path: PathBuf,
    state: OnceCell<RwLock<FlatState>>,
}

impl VectorIndex {
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dimension(&self) -> Option<usize> {
        self.state().read().dimension
    }

    fn state(&self) -> &RwLock<FlatState> {
        self.state.get_or_init(|| {
            let loaded: FlatSnapshot = snapshot::load_or_default(BACKEND, &self.path);
            debug!(backend = BACKEND, records = loaded.items.len(), "snapshot loaded");
            RwLock::new(FlatState::from_records(loaded.items))
        })
    }

    fn persist(&self, state: &FlatState) -> PersistOutcome {
        snapshot::persist(
            BACKEND,
            &self.path,
            &FlatSnapshotRef {
                items: &state.records,
            },
        )
    }
}

impl VectorBackend for VectorIndex {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn len(&self) -> usize {
        self.state().read().records.len()
    }

    fn add_batch(&self, vectors: Vec<Vec<f32>>, metadatas: Vec<PassageMetadata>) -> AddOutcome {
        let mut state = self.state().write();
        let mut inserted = 0usize;
        let mut skipped = 0usize;
        for (vector, metadata) in vectors.into_iter().zip(metadatas) {
            if !state.accepts(&vector) {
                warn!(
                    backend = BACKEND,
                    source_id = %metadata.source_id,
                    expected = ?state.dimension,
                    got = vector.len(),
                    "skipping vector with mismatched dimension"
                );
                skipped += 1;
                continue;
            }
            state.dimension = Some(vector.len());
            state.records.push(VectorRecord { vector, metadata });
            inserted += 1;
        }
        if inserted == 0 {
            return AddOutcome::nothing(skipped);
        }
        let persist = self.persist(&state);
        AddOutcome {
            inserted,
            skipped,
            persist,
        }
    }

    fn query(&self, vector: &[f32], top_k: usize) -> Vec<ScoredResult> {
        let state = self.state().read();
        if top_k == 0 || state.records.is_empty() {
            return Vec::new();
        }
        if state.dimension != Some(vector.len()) {
            warn!(
                backend = BACKEND,
                expected = ?state.dimension,
                got = vector.len(),
                "query dimension does not match index"
            );
            return Vec::new();
        }
        let mut hits: Vec<ScoredResult> = state
            .records
            .iter()
            .map(|record| ScoredResult {
                score: cosine_similarity(vector, &record.vector),
                metadata: record.metadata.clone(),
            })
            .collect();
        sort_descending(&mut hits);
        hits.truncate(top_k);
        hits
    }

    fn signatures(&self) -> HashSet<String> {
        self.state()
            .read()
            .records
            .iter()
            .map(|record| record.metadata.identity_signature())
            .collect()
    }

    fn delete_by_source(&self, source_id: &str) -> DeleteOutcome {
        let mut state = self.state().write();
        let before = state.records.len();
        state
            .records
            .retain(|record| record.metadata.source_id != source_id);
        let removed = before - state.records.len();
        if state.records.is_empty() {
            state.dimension = None;
        }
        let persist = if removed > 0 {
            self.persist(&state)
        } else {
            PersistOutcome::Unchanged
        };
        DeleteOutcome { removed, persist }
    }
}

/// `dot(a, b) / (|a| * |b|)` with both norms floored so zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut a_norm = 0.0f64;
    let mut b_norm = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        a_norm += x * x;
        b_norm += y * y;
    }
    let a_norm = a_norm.sqrt().max(NORM_FLOOR);
    let b_norm = b_norm.sqrt().max(NORM_FLOOR);
    dot / (a_norm * b_norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn meta(source: &str, page: u32) -> PassageMetadata {
        PassageMetadata::new(source, format!("{source}.pdf"), Some(page), "body")
    }

    #[test]
    fn cosine_handles_zero_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        let same = cosine_similarity(&[0.3, 0.4], &[0.3, 0.4]);
        assert!((same - 1.0).abs() < 1e-9);
        let opposite = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((opposite + 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_index_returns_no_hits() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::open(dir.path().join("vs.json"));
        assert!(index.query(&[1.0, 2.0], 5).is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn query_orders_by_similarity_and_limits() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::open(dir.path().join("vs.json"));
        index.add_batch(
            vec![vec![1.0, 0.0], vec![0.7, 0.7], vec![0.0, 1.0]],
            vec![meta("a", 1), meta("b", 1), meta("c", 1)],
        );
        let hits = index.query(&[1.0, 0.1], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata.source_id, "a");
        assert_eq!(hits[1].metadata.source_id, "b");
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn mismatched_dimension_is_skipped() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::open(dir.path().join("vs.json"));
        let first = index.add(vec![1.0, 0.0, 0.0], meta("a", 1));
        assert_eq!(first.inserted, 1);
        let second = index.add(vec![1.0, 0.0], meta("b", 1));
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(second.persist, PersistOutcome::Unchanged);
        assert_eq!(index.len(), 1);
        assert_eq!(index.dimension(), Some(3));
    }

    #[test]
    fn delete_removes_only_matching_source() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vs.json");
        let index = VectorIndex::open(&path);
        index.add_batch(
            vec![vec![1.0, 0.0], vec![0.9, 0.1], vec![0.0, 1.0]],
            vec![meta("f1", 1), meta("f1", 2), meta("f2", 1)],
        );
        let outcome = index.delete_by_source("f1");
        assert_eq!(outcome.removed, 2);
        assert!(outcome.persist.is_durable());
        let hits = index.query(&[1.0, 0.0], 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.source_id, "f2");

        let missing = index.delete_by_source("nope");
        assert_eq!(missing.removed, 0);
        assert_eq!(missing.persist, PersistOutcome::Unchanged);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["items"].as_array().unwrap().len(), 1);
        assert_eq!(raw["items"][0]["metadata"]["file_id"], "f2");
    }

    #[test]
    fn corrupt_snapshot_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vs.json");
        std::fs::write(&path, "{not json").unwrap();
        let index = VectorIndex::open(&path);
        assert_eq!(index.len(), 0);
        let outcome = index.add(vec![1.0], meta("a", 1));
        assert_eq!(outcome.inserted, 1);
        assert!(matches!(outcome.persist, PersistOutcome::Written { .. }));
    }

    #[test]
    fn failed_write_keeps_memory_state() {
        let dir = tempdir().unwrap();
        // A directory where the snapshot file should be makes every rename fail.
        let path = dir.path().join("blocked.json");
        std::fs::create_dir_all(path.join("inner")).unwrap();
        let index = VectorIndex::open(&path);
        let outcome = index.add(vec![1.0, 0.0], meta("a", 1));
        assert_eq!(outcome.inserted, 1);
        assert!(matches!(outcome.persist, PersistOutcome::Failed(_)));
        assert_eq!(index.query(&[1.0, 0.0], 1).len(), 1);
    }
}
