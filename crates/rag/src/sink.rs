use std::fs::{self, File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use qbank_index::JsonlWriter;

use crate::jobs::{JobItem, JobProgress};

pub trait ResultSink: Send {
    fn accept(&mut self, item: &JobItem) -> Result<()>;

    fn finish(&mut self, _progress: &JobProgress) -> Result<()> {
        Ok(())
    }
}

/// Appends items to `<dir>/<job_id>.jsonl` and writes a progress summary to
/// `<dir>/<job_id>.progress.json` when the job ends.
pub struct JsonlResultSink {
    dir: PathBuf,
    job_id: String,
    writer: Option<JsonlWriter<BufWriter<File>>>,
}

impl JsonlResultSink {
    pub fn new(dir: impl Into<PathBuf>, job_id: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            job_id: job_id.into(),
            writer: None,
        }
    }

    pub fn items_path(&self) -> PathBuf {
        self.dir.join(format!("{}.jsonl", self.job_id))
    }

    pub fn progress_path(&self) -> PathBuf {
        self.dir.join(format!("{}.progress.json", self.job_id))
    }

    fn writer(&mut self) -> Result<&mut JsonlWriter<BufWriter<File>>> {
        if self.writer.is_none() {
            fs::create_dir_all(&self.dir)
                .with_context(|| format!("failed to create {}", self.dir.display()))?;
            let path = self.items_path();
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            self.writer = Some(JsonlWriter::new(BufWriter::new(file)));
        }
        self.writer
            .as_mut()
            .context("jsonl writer was not initialised")
    }
}

impl ResultSink for JsonlResultSink {
    fn accept(&mut self, item: &JobItem) -> Result<()> {
        let writer = self.writer()?;
        writer.write_record(item)?;
        writer.flush()?;
        Ok(())
    }

    fn finish(&mut self, progress: &JobProgress) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        write_progress(&self.progress_path(), progress)
    }
}

fn write_progress(path: &Path, progress: &JobProgress) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_vec_pretty(progress)?;
    fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))
}

#[derive(Clone, Default)]
pub struct MemorySink {
    items: Arc<Mutex<Vec<JobItem>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Vec<JobItem> {
        self.items.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl ResultSink for MemorySink {
    fn accept(&mut self, item: &JobItem) -> Result<()> {
        self.items.lock().push(item.clone());
        Ok(())
    }
}
