use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dedup::{DuplicateGuard, DEFAULT_DUPLICATE_THRESHOLD};
use crate::generator::{Generation, StrictGenerator, DEFAULT_TOP_K, FALLBACK_QUESTION_ID};
use crate::schema::{GenerationResult, GenerationStatus};
use crate::sink::ResultSink;

pub const DEFAULT_ATTEMPT_MULTIPLIER: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_id: String,
    pub counts: BTreeMap<i64, usize>,
    #[serde(default)]
    pub allowed_sources: Vec<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

impl JobRequest {
    pub fn new(job_id: impl Into<String>, counts: BTreeMap<i64, usize>) -> Self {
        Self {
            job_id: job_id.into(),
            counts,
            allowed_sources: Vec::new(),
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn total_expected(&self) -> usize {
        self.counts.values().sum()
    }

    fn source_filter(&self) -> Option<&[String]> {
        if self.allowed_sources.is_empty() {
            None
        } else {
            Some(self.allowed_sources.as_slice())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobSettings {
    pub dedup_threshold: f64,
    pub attempt_multiplier: usize,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            dedup_threshold: DEFAULT_DUPLICATE_THRESHOLD,
            attempt_multiplier: DEFAULT_ATTEMPT_MULTIPLIER,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkProgress {
    pub target: usize,
    pub accepted: usize,
    pub attempts: usize,
    pub discarded: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: String,
    pub status: JobStatus,
    pub generated_count: usize,
    pub found_count: usize,
    pub not_found_count: usize,
    pub total_expected: usize,
    pub per_mark: BTreeMap<i64, MarkProgress>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobProgress {
    pub fn new(request: &JobRequest) -> Self {
        let per_mark = request
            .counts
            .iter()
            .map(|(&mark, &target)| {
                (
                    mark,
                    MarkProgress {
                        target,
                        ..MarkProgress::default()
                    },
                )
            })
            .collect();
        Self {
            job_id: request.job_id.clone(),
            status: JobStatus::Running,
            generated_count: 0,
            found_count: 0,
            not_found_count: 0,
            total_expected: request.total_expected(),
            per_mark,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    fn mark_mut(&mut self, mark: i64) -> &mut MarkProgress {
        self.per_mark.entry(mark).or_default()
    }

    fn record_accepted(&mut self, mark: i64, status: GenerationStatus) {
        self.generated_count += 1;
        match status {
            GenerationStatus::Found => self.found_count += 1,
            GenerationStatus::NotFound => self.not_found_count += 1,
        }
        self.mark_mut(mark).accepted += 1;
    }

    fn finish(&mut self, status: JobStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobItem {
    pub job_id: String,
    pub mark_value: i64,
    #[serde(flatten)]
    pub result: GenerationResult,
    pub retrieval_scores: Vec<f64>,
    pub attempts: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub raw_model_output: String,
    pub created_at: DateTime<Utc>,
}

impl JobItem {
    fn from_generation(job_id: &str, mark: i64, sequence: usize, generation: Generation) -> Self {
        let retrieval_scores = generation.retrieval_scores();
        let mut result = generation.result;
        if result.question_id.trim().is_empty() || result.question_id == FALLBACK_QUESTION_ID {
            result.question_id = format!("{job_id}-{mark}-{sequence}");
        }
        Self {
            job_id: job_id.to_string(),
            mark_value: mark,
            result,
            retrieval_scores,
            attempts: generation.attempts,
            error: generation.error,
            raw_model_output: generation.raw,
            created_at: Utc::now(),
        }
    }
}

pub struct JobControl {
    cancelled: AtomicBool,
    snapshot: RwLock<Option<JobProgress>>,
}

impl JobControl {
    pub fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            snapshot: RwLock::new(None),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Option<JobProgress> {
        self.snapshot.read().clone()
    }

    fn publish(&self, progress: &JobProgress) {
        *self.snapshot.write() = Some(progress.clone());
    }
}

impl Default for JobControl {
    fn default() -> Self {
        Self::new()
    }
}

pub struct BatchJobRunner {
    generator: Arc<StrictGenerator>,
    settings: JobSettings,
}

impl BatchJobRunner {
    pub fn new(generator: Arc<StrictGenerator>) -> Self {
        Self {
            generator,
            settings: JobSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: JobSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn run(&self, request: &JobRequest, sink: &mut dyn ResultSink) -> JobProgress {
        self.run_with_control(request, sink, &JobControl::new())
    }

    /// Cancellation is honoured between mark values; the mark in flight runs
    /// to completion.
    pub fn run_with_control(
        &self,
        request: &JobRequest,
        sink: &mut dyn ResultSink,
        control: &JobControl,
    ) -> JobProgress {
        let mut progress = JobProgress::new(request);
        control.publish(&progress);
        let mut guard = DuplicateGuard::new(self.settings.dedup_threshold);
        let allowed = request.source_filter();
        info!(
            job_id = %request.job_id,
            total_expected = progress.total_expected,
            "job started"
        );

        let mut final_status = JobStatus::Completed;
        for (&mark, &target) in &request.counts {
            if control.is_cancelled() {
                final_status = JobStatus::Cancelled;
                break;
            }
            let budget = target.saturating_mul(self.settings.attempt_multiplier);
            let task = format!("Generate a {mark}-mark question");
            let mut accepted = 0usize;
            let mut attempts = 0usize;
            while accepted < target && attempts < budget {
                attempts += 1;
                progress.mark_mut(mark).attempts = attempts;
                let generation = self.generator.generate(&task, mark, request.top_k, allowed);
                let text = generation.result.question_text.trim().to_string();
                if text.is_empty() || !guard.admit(&text) {
                    progress.mark_mut(mark).discarded += 1;
                    control.publish(&progress);
                    continue;
                }
                accepted += 1;
                progress.record_accepted(mark, generation.result.status);
                let item = JobItem::from_generation(
                    &request.job_id,
                    mark,
                    progress.generated_count,
                    generation,
                );
                if let Err(err) = sink.accept(&item) {
                    warn!(job_id = %request.job_id, mark, "failed to persist job item: {err:#}");
                }
                control.publish(&progress);
            }
            if accepted < target {
                warn!(
                    job_id = %request.job_id,
                    mark,
                    accepted,
                    target,
                    "attempt budget exhausted"
                );
            }
        }

        progress.finish(final_status);
        control.publish(&progress);
        if let Err(err) = sink.finish(&progress) {
            warn!(job_id = %request.job_id, "failed to persist job progress: {err:#}");
        }
        info!(
            job_id = %request.job_id,
            status = ?progress.status,
            generated = progress.generated_count,
            found = progress.found_count,
            not_found = progress.not_found_count,
            "job finished"
        );
        progress
    }
}

pub struct JobHandle {
    job_id: String,
    control: Arc<JobControl>,
    thread: JoinHandle<JobProgress>,
}

impl JobHandle {
    pub fn spawn(
        runner: Arc<BatchJobRunner>,
        request: JobRequest,
        mut sink: Box<dyn ResultSink>,
    ) -> Self {
        let control = Arc::new(JobControl::new());
        control.publish(&JobProgress::new(&request));
        let job_id = request.job_id.clone();
        let worker_control = control.clone();
        let thread = thread::spawn(move || {
            runner.run_with_control(&request, sink.as_mut(), &worker_control)
        });
        Self {
            job_id,
            control,
            thread,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn progress(&self) -> Option<JobProgress> {
        self.control.snapshot()
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the worker. A panicked worker yields the last published
    /// snapshot.
    pub fn join(self) -> Option<JobProgress> {
        match self.thread.join() {
            Ok(progress) => Some(progress),
            Err(_) => {
                warn!(job_id = %self.job_id, "job worker panicked");
                self.control.snapshot()
            }
        }
    }
}
