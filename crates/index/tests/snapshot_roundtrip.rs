use qbank_index::{IndexedVectorIndex, PassageMetadata, VectorBackend, VectorIndex};
use tempfile::tempdir;

fn pages() -> (Vec<Vec<f32>>, Vec<PassageMetadata>) {
    let vectors = vec![
        vec![0.9, 0.1, 0.0, 0.2],
        vec![0.1, 0.8, 0.3, 0.0],
        vec![0.4, 0.4, 0.4, 0.4],
        vec![0.0, 0.0, 1.0, 0.1],
        vec![0.7, 0.0, 0.2, 0.6],
    ];
    let metadatas = (0..vectors.len())
        .map(|i| {
            PassageMetadata::new(
                format!("file-{}", i % 2),
                format!("unit{}.pdf", i % 2),
                Some(i as u32 + 1),
                format!("page {} text", i + 1),
            )
        })
        .collect();
    (vectors, metadatas)
}

fn assert_same_ranking(before: &[qbank_index::ScoredResult], after: &[qbank_index::ScoredResult]) {
    assert_eq!(before.len(), after.len());
    for (a, b) in before.iter().zip(after) {
        assert_eq!(a.metadata, b.metadata);
        assert!((a.score - b.score).abs() < 1e-6);
    }
}

#[test]
fn flat_index_reload_preserves_ranking() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("storage/vector_store.json");
    let (vectors, metadatas) = pages();
    let query = vec![0.6, 0.2, 0.1, 0.3];

    let original = VectorIndex::open(&path);
    let outcome = original.add_batch(vectors, metadatas);
    assert_eq!(outcome.inserted, 5);
    assert!(outcome.persist.is_durable());
    let before = original.query(&query, 3);

    let reloaded = VectorIndex::open(&path);
    assert_eq!(reloaded.len(), 5);
    let after = reloaded.query(&query, 3);
    assert_same_ranking(&before, &after);
}

#[test]
fn indexed_reload_preserves_ranking() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("storage/faiss_store.json");
    let (vectors, metadatas) = pages();
    let query = vec![0.6, 0.2, 0.1, 0.3];

    let original = IndexedVectorIndex::open(&path);
    original.add_batch(vectors, metadatas);
    let before = original.query(&query, 4);

    let reloaded = IndexedVectorIndex::open(&path);
    let after = reloaded.query(&query, 4);
    assert_same_ranking(&before, &after);
}

#[test]
fn flat_snapshot_uses_items_layout() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vs.json");
    let index = VectorIndex::open(&path);
    index.add(
        vec![1.0, 2.0],
        PassageMetadata::new("f1", "a.pdf", Some(7), "text"),
    );
    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let item = &raw["items"][0];
    assert_eq!(item["embedding"], serde_json::json!([1.0, 2.0]));
    assert_eq!(item["metadata"]["page_no"], 7);
}
