use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[cfg(feature = "flat-ip")]
use ndarray::{Array2, ArrayView1};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::{sort_descending, AddOutcome, DeleteOutcome, PersistOutcome, VectorBackend};
use crate::metadata::{PassageMetadata, ScoredResult};
use crate::snapshot;

const BACKEND: &str = "indexed";

#[derive(Default, Deserialize)]
struct IndexedSnapshot {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    metadatas: Vec<PassageMetadata>,
}

#[derive(Serialize)]
struct IndexedSnapshotRef<'a> {
    embeddings: &'a [Vec<f32>],
    metadatas: &'a [PassageMetadata],
}

#[derive(Default)]
struct IndexedState {
    vectors: Vec<Vec<f32>>,
    metadatas: Vec<PassageMetadata>,
    dimension: Option<usize>,
    #[cfg(feature = "flat-ip")]
    matrix: Option<Array2<f32>>,
}

impl IndexedState {
    fn from_snapshot(snapshot: IndexedSnapshot) -> Self {
        let mut state = IndexedState::default();
        if snapshot.embeddings.len() != snapshot.metadatas.len() {
            warn!(
                backend = BACKEND,
                embeddings = snapshot.embeddings.len(),
                metadatas = snapshot.metadatas.len(),
                "snapshot arrays are not aligned, truncating to the shorter one"
            );
        }
        for (vector, metadata) in snapshot.embeddings.into_iter().zip(snapshot.metadatas) {
            if vector.is_empty() || state.dimension.map_or(false, |dim| dim != vector.len()) {
                continue;
            }
            state.dimension = Some(vector.len());
            state.vectors.push(vector);
            state.metadatas.push(metadata);
        }
        state.rebuild();
        state
    }

    /// Recompiles the search structure from the held vectors.
    #[cfg(feature = "flat-ip")]
    fn rebuild(&mut self) {
        self.matrix = None;
        let Some(dim) = self.dimension else {
            return;
        };
        let flat: Vec<f32> = self.vectors.iter().flatten().copied().collect();
        match Array2::from_shape_vec((self.vectors.len(), dim), flat) {
            Ok(matrix) => self.matrix = Some(matrix),
            Err(err) => warn!(backend = BACKEND, "failed to build inner-product matrix: {err}"),
        }
    }

    #[cfg(not(feature = "flat-ip"))]
    fn rebuild(&mut self) {}

    /// Pushes the last `count` held vectors into the matrix.
    #[cfg(feature = "flat-ip")]
    fn append_tail(&mut self, count: usize) {
        let Some(dim) = self.dimension else {
            return;
        };
        let start = self.vectors.len().saturating_sub(count);
        let matrix = self.matrix.get_or_insert_with(|| Array2::zeros((0, dim)));
        let mut failed = false;
        for vector in &self.vectors[start..] {
            if let Err(err) = matrix.push_row(ArrayView1::from(vector.as_slice())) {
                warn!(backend = BACKEND, "row append failed, rebuilding: {err}");
                failed = true;
                break;
            }
        }
        if failed {
            self.rebuild();
        }
    }

    #[cfg(not(feature = "flat-ip"))]
    fn append_tail(&mut self, _count: usize) {}

    #[cfg(feature = "flat-ip")]
    fn search(&self, vector: &[f32], top_k: usize) -> Vec<ScoredResult> {
        let Some(matrix) = &self.matrix else {
            return Vec::new();
        };
        let scores = matrix.dot(&ArrayView1::from(vector));
        let mut hits: Vec<ScoredResult> = scores
            .iter()
            .zip(self.metadatas.iter())
            .map(|(score, metadata)| ScoredResult {
                score: *score as f64,
                metadata: metadata.clone(),
            })
            .collect();
        sort_descending(&mut hits);
        hits.truncate(top_k);
        hits
    }

    #[cfg(not(feature = "flat-ip"))]
    fn search(&self, _vector: &[f32], _top_k: usize) -> Vec<ScoredResult> {
        Vec::new()
    }
}

/// Exact inner-product index over a dense matrix.
///
/// The matrix has no native delete, so [`VectorBackend::delete_by_source`]
/// filters the raw arrays and rebuilds it. Only raw vectors and metadata are
/// persisted; the matrix is recompiled lazily on first use.
pub struct IndexedVectorIndex {
    path: PathBuf,
    state: OnceCell<RwLock<IndexedState>>,
}

impl IndexedVectorIndex {
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

    fn state(&self) -> &RwLock<IndexedState> {
        self.state.get_or_init(|| {
            let loaded: IndexedSnapshot = snapshot::load_or_default(BACKEND, &self.path);
            debug!(
                backend = BACKEND,
                records = loaded.embeddings.len(),
                "snapshot loaded"
            );
            RwLock::new(IndexedState::from_snapshot(loaded))
        })
    }

    fn persist(&self, state: &IndexedState) -> PersistOutcome {
        snapshot::persist(
            BACKEND,
            &self.path,
            &IndexedSnapshotRef {
                embeddings: &state.vectors,
                metadatas: &state.metadatas,
            },
        )
    }
}

impl VectorBackend for IndexedVectorIndex {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn available(&self) -> bool {
        cfg!(feature = "flat-ip")
    }

    fn len(&self) -> usize {
        if !self.available() {
            return 0;
        }
        self.state().read().vectors.len()
    }

    fn add_batch(&self, vectors: Vec<Vec<f32>>, metadatas: Vec<PassageMetadata>) -> AddOutcome {
        if !self.available() || vectors.is_empty() {
            return AddOutcome::nothing(0);
        }
        if vectors.len() != metadatas.len() {
            warn!(
                backend = BACKEND,
                vectors = vectors.len(),
                metadatas = metadatas.len(),
                "vector and metadata counts differ, extra entries are ignored"
            );
        }
        let mut state = self.state().write();
        let batch_dim = vectors[0].len();
        let established = state.dimension.unwrap_or(batch_dim);
        if batch_dim == 0 || batch_dim != established || vectors.iter().any(|v| v.len() != batch_dim)
        {
            warn!(
                backend = BACKEND,
                expected = established,
                got = batch_dim,
                "skipping batch with mismatched dimension"
            );
            return AddOutcome::nothing(vectors.len());
        }
        state.dimension = Some(batch_dim);
        let pairs: Vec<(Vec<f32>, PassageMetadata)> = vectors.into_iter().zip(metadatas).collect();
        let inserted = pairs.len();
        let (new_vectors, new_metadatas): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        state.vectors.extend(new_vectors);
        state.metadatas.extend(new_metadatas);
        state.append_tail(inserted);
        let persist = self.persist(&state);
        AddOutcome {
            inserted,
            skipped: 0,
            persist,
        }
    }

    fn query(&self, vector: &[f32], top_k: usize) -> Vec<ScoredResult> {
        if !self.available() || top_k == 0 {
            return Vec::new();
        }
        let state = self.state().read();
        match state.dimension {
            Some(dim) if dim == vector.len() => state.search(vector, top_k),
            Some(dim) => {
                warn!(
                    backend = BACKEND,
                    expected = dim,
                    got = vector.len(),
                    "query dimension does not match index"
                );
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    fn signatures(&self) -> HashSet<String> {
        if !self.available() {
            return HashSet::new();
        }
        self.state()
            .read()
            .metadatas
            .iter()
            .map(PassageMetadata::identity_signature)
            .collect()
    }

    fn delete_by_source(&self, source_id: &str) -> DeleteOutcome {
        if !self.available() {
            return DeleteOutcome {
                removed: 0,
                persist: PersistOutcome::Unchanged,
            };
        }
        let mut state = self.state().write();
        let before = state.vectors.len();
        let (vectors, metadatas): (Vec<_>, Vec<_>) = std::mem::take(&mut state.vectors)
            .into_iter()
            .zip(std::mem::take(&mut state.metadatas))
            .filter(|(_, metadata)| metadata.source_id != source_id)
            .unzip();
        state.vectors = vectors;
        state.metadatas = metadatas;
        let removed = before - state.vectors.len();
        if removed == 0 {
            return DeleteOutcome {
                removed,
                persist: PersistOutcome::Unchanged,
            };
        }
        if state.vectors.is_empty() {
            state.dimension = None;
        }
        state.rebuild();
        debug!(backend = BACKEND, source_id, removed, "rebuilt after delete");
        let persist = self.persist(&state);
        DeleteOutcome { removed, persist }
    }
}

#[cfg(all(test, feature = "flat-ip"))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn meta(source: &str, page: u32) -> PassageMetadata {
        PassageMetadata::new(source, format!("{source}.pdf"), Some(page), "body")
    }

    #[test]
    fn inner_product_ranks_largest_first() {
        let dir = tempdir().unwrap();
        let index = IndexedVectorIndex::open(dir.path().join("ip.json"));
        assert!(index.available());
        index.add_batch(
            vec![vec![0.1, 0.2, 0.3], vec![0.2, 0.1, 0.0], vec![1.0, 1.0, 1.0]],
            vec![meta("f1", 1), meta("f2", 1), meta("f3", 1)],
        );
        let hits = index.query(&[1.0, 0.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata.source_id, "f3");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].metadata.source_id, "f2");
    }

    #[test]
    fn batch_with_foreign_dimension_is_a_no_op() {
        let dir = tempdir().unwrap();
        let index = IndexedVectorIndex::open(dir.path().join("ip.json"));
        index.add_batch(vec![vec![1.0, 0.0]], vec![meta("a", 1)]);
        let outcome = index.add_batch(
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]],
            vec![meta("b", 1), meta("b", 2)],
        );
        assert_eq!(outcome.inserted, 0);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(index.len(), 1);
        assert_eq!(index.dimension(), Some(2));
    }

    #[test]
    fn delete_rebuilds_and_persists_aligned_arrays() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ip.json");
        let index = IndexedVectorIndex::open(&path);
        index.add_batch(
            vec![vec![0.1, 0.2, 0.3], vec![0.2, 0.1, 0.0]],
            vec![meta("f1", 1), meta("f2", 1)],
        );
        let outcome = index.delete_by_source("f1");
        assert_eq!(outcome.removed, 1);
        let hits = index.query(&[0.1, 0.2, 0.3], 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.source_id, "f2");

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["embeddings"].as_array().unwrap().len(), 1);
        let metadatas = raw["metadatas"].as_array().unwrap();
        assert!(metadatas.iter().all(|m| m["file_id"] != "f1"));
    }

    #[test]
    fn reopened_index_is_rebuilt_lazily() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ip.json");
        {
            let index = IndexedVectorIndex::open(&path);
            index.add_batch(
                vec![vec![0.5, 0.5], vec![1.0, 0.0]],
                vec![meta("f1", 1), meta("f2", 3)],
            );
        }
        let reopened = IndexedVectorIndex::open(&path);
        assert_eq!(reopened.len(), 2);
        let hits = reopened.query(&[1.0, 0.0], 1);
        assert_eq!(hits[0].metadata.source_id, "f2");
        assert_eq!(hits[0].metadata.position, Some(3));
    }

    #[test]
    fn deleting_everything_resets_dimension() {
        let dir = tempdir().unwrap();
        let index = IndexedVectorIndex::open(dir.path().join("ip.json"));
        index.add_batch(vec![vec![1.0, 0.0]], vec![meta("f1", 1)]);
        index.delete_by_source("f1");
        assert!(index.query(&[1.0, 0.0], 3).is_empty());
        let outcome = index.add_batch(vec![vec![1.0, 0.0, 0.0]], vec![meta("f2", 1)]);
        assert_eq!(outcome.inserted, 1);
        assert_eq!(index.dimension(), Some(3));
    }
}
