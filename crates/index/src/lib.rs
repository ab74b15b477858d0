mod backend;
mod error;
mod flat;
mod indexed;
mod jsonl;
mod metadata;
mod snapshot;

pub use backend::{AddOutcome, DeleteOutcome, PersistOutcome, VectorBackend};
pub use error::{IndexError, Result};
pub use flat::{cosine_similarity, VectorIndex};
pub use indexed::IndexedVectorIndex;
pub use jsonl::JsonlWriter;
pub use metadata::{PassageMetadata, ScoredResult, VectorRecord};
