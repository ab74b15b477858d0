mod app;
mod cli;
mod config;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use qbank_index::VectorBackend;
use qbank_rag::{index_pages, load_pages, JobHandle, JsonlResultSink, Passage, PREVIEW_CHARS};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::cli::{Cli, Command};
use crate::config::{JobFile, QbankConfig};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut config = QbankConfig::from_env()?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    let app = App::open(config)?;

    match cli.command {
        Command::Ingest { pages, batch_size } => {
            let pages = load_pages(&pages)?;
            let report = index_pages(app.embedder.as_ref(), &app.backends(), pages, batch_size);
            print_json(&report)
        }
        Command::Retrieve {
            query,
            top_k,
            sources,
        } => {
            let top_k = top_k.unwrap_or(app.config.top_k);
            let hits = app.retrieve(&query, top_k, source_filter(&sources));
            let passages: Vec<Passage> = hits
                .iter()
                .map(|hit| Passage::from_hit(hit).preview(PREVIEW_CHARS))
                .collect();
            print_json(&passages)
        }
        Command::Generate {
            task,
            marks,
            top_k,
            sources,
        } => {
            let generator = app.generator()?;
            let top_k = top_k.unwrap_or(app.config.top_k);
            let generation = generator.generate(&task, marks, top_k, source_filter(&sources));
            print_json(&generation)
        }
        Command::Job { file } => {
            let request = JobFile::load(&file)?.into_request(app.config.top_k)?;
            let sink = JsonlResultSink::new(app.config.jobs_dir(), request.job_id.clone());
            info!(job_id = %request.job_id, items = %sink.items_path().display(), "submitting job");
            let handle = JobHandle::spawn(Arc::new(app.runner()?), request, Box::new(sink));
            while !handle.is_finished() {
                thread::sleep(PROGRESS_INTERVAL);
                if let Some(progress) = handle.progress() {
                    info!(
                        job_id = handle.job_id(),
                        generated = progress.generated_count,
                        total_expected = progress.total_expected,
                        "job running"
                    );
                }
            }
            print_json(&handle.join())
        }
        Command::DeleteSource { source_id } => {
            let mut removed = serde_json::Map::new();
            for backend in app.backends() {
                let outcome = backend.delete_by_source(&source_id);
                removed.insert(backend.name().to_string(), outcome.removed.into());
            }
            print_json(&removed)
        }
        Command::Stats => print_json(&app.stats()),
    }
}

fn source_filter(sources: &[String]) -> Option<&[String]> {
    if sources.is_empty() {
        None
    } else {
        Some(sources)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
