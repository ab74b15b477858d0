use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "qbank", about = "Retrieval-grounded exam question bank")]
pub struct Cli {
    /// Overrides QBANK_DATA_DIR.
    #[arg(long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Embed pre-extracted pages (JSONL) into both indexes.
    Ingest {
        pages: PathBuf,
        #[arg(long, default_value_t = 32)]
        batch_size: usize,
    },
    /// Show the top-k passages for a query.
    Retrieve {
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long = "source")]
        sources: Vec<String>,
    },
    /// Generate a single question.
    Generate {
        task: String,
        #[arg(long)]
        marks: i64,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long = "source")]
        sources: Vec<String>,
    },
    /// Run a batch job described by a TOML file.
    Job { file: PathBuf },
    /// Remove every passage of a source from both indexes.
    DeleteSource { source_id: String },
    /// Print index sizes and dimensions.
    Stats,
}
