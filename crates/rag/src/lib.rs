pub mod dedup;
pub mod embedding;
pub mod generator;
pub mod ingest;
pub mod jobs;
pub mod merger;
pub mod prompt;
pub mod schema;
pub mod sink;
pub mod validator;

pub use dedup::{similarity, DuplicateGuard};
pub use embedding::{
    Embedder, EmbeddingBackend, EmbeddingClient, GeminiEmbeddingClient, HashEmbedder,
    RemoteEmbedding, RetryPolicy,
};
pub use generator::{Generation, GeneratorSettings, StrictGenerator};
pub use ingest::{index_pages, load_pages, BackendIngestReport, IngestReport};
pub use jobs::{
    BatchJobRunner, JobControl, JobHandle, JobItem, JobProgress, JobRequest, JobSettings,
    JobStatus, MarkProgress,
};
pub use merger::{merge_hits, Passage, RetrievalMerger, PREVIEW_CHARS};
pub use schema::{GenerationResult, GenerationStatus, OUTPUT_FIELDS};
pub use sink::{JsonlResultSink, MemorySink, ResultSink};
pub use validator::ValidationError;

pub use qbank_index::{PassageMetadata, ScoredResult, VectorBackend};
pub use qbank_llm::{LlmClient, LlmProvider, TextGenerator};
