use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use qbank_index::{PassageMetadata, PersistOutcome, VectorBackend};
use serde::Serialize;
use tracing::{info, warn};

use crate::embedding::Embedder;

pub const DEFAULT_INGEST_BATCH: usize = 32;

#[derive(Debug, Clone, Default, Serialize)]
pub struct BackendIngestReport {
    pub backend: String,
    pub inserted: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub persist_failures: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub pages_read: usize,
    pub pages_empty: usize,
    pub backends: Vec<BackendIngestReport>,
}

/// Reads page records, one JSON object per line with the passage metadata
/// keys (`file_id`, `file_name`, `page_no`, `text`). Blank lines are ignored.
pub fn load_pages(path: &Path) -> Result<Vec<PassageMetadata>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut pages = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let page: PassageMetadata = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid page record", path.display(), idx + 1))?;
        pages.push(page);
    }
    Ok(pages)
}

/// Embeds page texts in batches and adds them to every available backend.
/// Pages a backend already holds, by identity signature, are not added again
/// and are only embedded when some other backend still needs them.
pub fn index_pages(
    embedder: &dyn Embedder,
    backends: &[Arc<dyn VectorBackend>],
    pages: Vec<PassageMetadata>,
    batch_size: usize,
) -> IngestReport {
    let pages_read = pages.len();
    let pages: Vec<PassageMetadata> = pages
        .into_iter()
        .filter(|page| !page.excerpt.trim().is_empty())
        .collect();
    let mut report = IngestReport {
        pages_read,
        pages_empty: pages_read - pages.len(),
        backends: backends
            .iter()
            .map(|backend| BackendIngestReport {
                backend: backend.name().to_string(),
                ..BackendIngestReport::default()
            })
            .collect(),
    };
    let mut held: Vec<Option<HashSet<String>>> = backends
        .iter()
        .map(|backend| backend.available().then(|| backend.signatures()))
        .collect();

    for chunk in pages.chunks(batch_size.max(1)) {
        let signatures: Vec<String> = chunk.iter().map(PassageMetadata::identity_signature).collect();
        let wanted: Vec<Vec<bool>> = held
            .iter_mut()
            .map(|seen| match seen {
                Some(seen) => signatures.iter().map(|sig| seen.insert(sig.clone())).collect(),
                None => vec![false; chunk.len()],
            })
            .collect();
        let needed: Vec<usize> = (0..chunk.len())
            .filter(|&idx| wanted.iter().any(|mask| mask[idx]))
            .collect();
        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; chunk.len()];
        if !needed.is_empty() {
            let texts: Vec<String> = needed.iter().map(|&idx| chunk[idx].excerpt.clone()).collect();
            for (idx, vector) in needed.iter().zip(embedder.embed(&texts)) {
                vectors[*idx] = Some(vector);
            }
        }

        for ((backend, summary), mask) in backends.iter().zip(report.backends.iter_mut()).zip(&wanted) {
            if !backend.available() {
                continue;
            }
            let mut batch_vectors = Vec::new();
            let mut batch_pages = Vec::new();
            for (idx, page) in chunk.iter().enumerate() {
                match (mask[idx], &vectors[idx]) {
                    (true, Some(vector)) => {
                        batch_vectors.push(vector.clone());
                        batch_pages.push(page.clone());
                    }
                    (true, None) => summary.skipped += 1,
                    (false, _) => summary.duplicates += 1,
                }
            }
            if batch_vectors.is_empty() {
                continue;
            }
            let outcome = backend.add_batch(batch_vectors, batch_pages);
            summary.inserted += outcome.inserted;
            summary.skipped += outcome.skipped;
            if let PersistOutcome::Failed(reason) = &outcome.persist {
                warn!(backend = backend.name(), %reason, "snapshot write failed during ingest");
                summary.persist_failures += 1;
            }
        }
    }
    for summary in &report.backends {
        info!(
            backend = %summary.backend,
            inserted = summary.inserted,
            skipped = summary.skipped,
            duplicates = summary.duplicates,
            "ingest finished"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::merger::RetrievalMerger;
    use qbank_index::{IndexedVectorIndex, VectorIndex};
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn pages_are_loaded_and_indexed() {
        let dir = tempdir().unwrap();
        let pages_path = dir.path().join("pages.jsonl");
        let mut file = File::create(&pages_path).unwrap();
        writeln!(file, r#"{{"file_id":"f1","file_name":"a.pdf","page_no":1,"text":"alpha"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"file_id":"f1","file_name":"a.pdf","page_no":2,"text":"   "}}"#).unwrap();
        writeln!(file, r#"{{"file_id":"f2","file_name":"b.pdf","page_no":1,"text":"beta"}}"#).unwrap();
        drop(file);

        let pages = load_pages(&pages_path).unwrap();
        assert_eq!(pages.len(), 3);

        let index: Arc<dyn VectorBackend> = Arc::new(VectorIndex::open(dir.path().join("flat.json")));
        let report = index_pages(&HashEmbedder::default(), &[index.clone()], pages, 1);
        assert_eq!(report.pages_empty, 1);
        assert_eq!(report.backends[0].inserted, 2);
        assert_eq!(report.backends[0].persist_failures, 0);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn reingesting_the_same_pages_adds_nothing() {
        let dir = tempdir().unwrap();
        let flat: Arc<dyn VectorBackend> = Arc::new(VectorIndex::open(dir.path().join("flat.json")));
        let indexed: Arc<dyn VectorBackend> =
            Arc::new(IndexedVectorIndex::open(dir.path().join("indexed.json")));
        let backends = vec![flat.clone(), indexed.clone()];
        let pages: Vec<PassageMetadata> = (1..=4)
            .map(|page| PassageMetadata::new("f1", "a.pdf", Some(page), format!("page {page} body")))
            .collect();
        let embedder = HashEmbedder::default();

        let first = index_pages(&embedder, &backends, pages.clone(), 3);
        assert_eq!(first.backends[0].inserted, 4);
        assert_eq!(first.backends[0].duplicates, 0);

        let second = index_pages(&embedder, &backends, pages.clone(), 3);
        assert_eq!(flat.len(), 4);
        assert_eq!(second.backends[0].inserted, 0);
        assert_eq!(second.backends[0].duplicates, 4);
        if indexed.available() {
            assert_eq!(indexed.len(), 4);
            assert_eq!(second.backends[1].duplicates, 4);
        }

        let merger = RetrievalMerger::new(backends);
        let hits = merger.retrieve(&embedder.embed_one("page 1 body"), 4, None);
        let positions: HashSet<Option<u32>> = hits.iter().map(|hit| hit.metadata.position).collect();
        assert_eq!(hits.len(), 4);
        assert_eq!(positions.len(), 4);
    }

    #[test]
    fn repeated_pages_within_one_file_are_added_once() {
        let dir = tempdir().unwrap();
        let index: Arc<dyn VectorBackend> = Arc::new(VectorIndex::open(dir.path().join("flat.json")));
        let page = PassageMetadata::new("f1", "a.pdf", Some(1), "alpha");
        let report = index_pages(&HashEmbedder::default(), &[index.clone()], vec![page.clone(), page], 8);
        assert_eq!(report.backends[0].inserted, 1);
        assert_eq!(report.backends[0].duplicates, 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn malformed_lines_name_their_position() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "{\"file_id\": \"f\"}\nnot json\n").unwrap();
        let err = load_pages(&path).unwrap_err();
        assert!(format!("{err:#}").contains(":2:"));
    }
}
