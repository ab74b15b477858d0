use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use qbank_index::{IndexedVectorIndex, PassageMetadata, VectorBackend, VectorIndex};
use qbank_llm::LlmClient;
use qbank_rag::{
    index_pages, BatchJobRunner, EmbeddingClient, JobItem, JobProgress, JobRequest, JobStatus,
    JsonlResultSink, RetrievalMerger, StrictGenerator,
};
use tempfile::tempdir;

fn notes() -> Vec<PassageMetadata> {
    let mut pages = Vec::new();
    let texts = [
        "Ohm's law states that current through a conductor is proportional to voltage.",
        "Kirchhoff's current law: the sum of currents entering a node equals zero.",
        "A capacitor stores energy in the electric field between its plates.",
        "Inductors oppose changes in current by inducing an opposing voltage.",
    ];
    for (idx, text) in texts.iter().enumerate() {
        pages.push(PassageMetadata::new("circuits", "circuits.pdf", Some(idx as u32 + 1), *text));
    }
    pages.push(PassageMetadata::new("history", "history.pdf", Some(1), "The Treaty of Westphalia was signed in 1648."));
    pages
}

#[test]
fn job_writes_items_and_progress_to_jsonl() {
    let dir = tempdir().unwrap();
    let embedder = Arc::new(EmbeddingClient::hash(32));
    let backends: Vec<Arc<dyn VectorBackend>> = vec![
        Arc::new(VectorIndex::open(dir.path().join("flat.json"))),
        Arc::new(IndexedVectorIndex::open(dir.path().join("indexed.json"))),
    ];
    let report = index_pages(embedder.as_ref(), &backends, notes(), 2);
    assert!(report.backends.iter().all(|b| b.inserted == 5));

    let generator = StrictGenerator::new(
        embedder,
        RetrievalMerger::new(backends),
        Arc::new(LlmClient::local().unwrap()),
    );
    let runner = BatchJobRunner::new(Arc::new(generator));
    let mut request = JobRequest::new("exam-1", BTreeMap::from([(2, 1)]));
    request.allowed_sources = vec!["circuits".to_string()];
    request.top_k = 3;

    let out_dir = dir.path().join("jobs");
    let mut sink = JsonlResultSink::new(&out_dir, "exam-1");
    let progress = runner.run(&request, &mut sink);
    assert_eq!(progress.status, JobStatus::Completed);
    assert_eq!(progress.generated_count, 1);

    let lines = fs::read_to_string(sink.items_path()).unwrap();
    let items: Vec<JobItem> = lines
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(items.len(), 1);
    let item = &items[0];
    assert_eq!(item.mark_value, 2);
    assert!(item.result.is_found());
    assert!(item.retrieval_scores.len() <= 3);
    assert!(item
        .result
        .page_references
        .iter()
        .all(|reference| reference.starts_with("circuits:")));

    let saved: JobProgress =
        serde_json::from_str(&fs::read_to_string(sink.progress_path()).unwrap()).unwrap();
    assert_eq!(saved.generated_count, 1);
    assert_eq!(saved.status, JobStatus::Completed);
}

#[test]
fn deleting_a_source_hides_it_from_retrieval() {
    let dir = tempdir().unwrap();
    let embedder = Arc::new(EmbeddingClient::hash(32));
    let flat: Arc<dyn VectorBackend> = Arc::new(VectorIndex::open(dir.path().join("flat.json")));
    index_pages(embedder.as_ref(), &[flat.clone()], notes(), 8);

    let generator = StrictGenerator::new(
        embedder,
        RetrievalMerger::new(vec![flat.clone()]),
        Arc::new(LlmClient::local().unwrap()),
    );
    let before = generator.retrieve("Westphalia", 10, None);
    assert!(before.iter().any(|hit| hit.metadata.source_id == "history"));

    assert_eq!(flat.delete_by_source("history").removed, 1);
    let after = generator.retrieve("Westphalia", 10, None);
    assert_eq!(after.len(), 4);
    assert!(after.iter().all(|hit| hit.metadata.source_id == "circuits"));
}
