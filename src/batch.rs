use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::error::{JobError, Result};
use crate::pipeline::{Pipeline, PipelineJob, PipelineOutcome, Stage};
use crate::playlist::PlaylistEntry;
use crate::progress::{BatchProgress, ProgressSink};
use crate::selector::FormatChoice;

/// What to do with one playlist entry.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryDecision {
    /// Run the pipeline with this format pair.
    Download(FormatChoice),
    /// Left out by the user; not counted.
    Skip,
    /// Selected, but no format pair could be chosen. Counted as failed.
    Unresolved(JobError),
}

/// One playlist entry with the decision about it.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub entry: PlaylistEntry,
    pub decision: EntryDecision,
    pub watermark: bool,
}

impl BatchItem {
    pub fn is_selected(&self) -> bool {
        !matches!(self.decision, EntryDecision::Skip)
    }
}

/// Aggregate classification of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    FullSuccess,
    Partial,
    AllFailed,
}

/// Per-entry result; `outcome` is `None` for entries that were skipped.
/// Unresolved entries carry a failed outcome without running the pipeline.
#[derive(Debug, Clone)]
pub struct EntryReport {
    pub video_url: String,
    pub title: Option<String>,
    pub outcome: Option<PipelineOutcome>,
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub output_dir: PathBuf,
    pub selected_count: usize,
    /// Selected entries whose pipeline succeeded.
    pub completed_count: usize,
    pub entries: Vec<EntryReport>,
    pub status: BatchStatus,
    /// (URL, error message) of every failed entry.
    pub failures: Vec<(String, String)>,
}

impl BatchReport {
    pub fn failed_count(&self) -> usize {
        self.selected_count - self.completed_count
    }
}

/// Classifies a finished batch. An empty selection counts as full success.
pub fn classify(completed: usize, selected: usize) -> BatchStatus {
    if completed == selected {
        BatchStatus::FullSuccess
    } else if completed == 0 {
        BatchStatus::AllFailed
    } else {
        BatchStatus::Partial
    }
}

/// Creates a fresh `playlist_<timestamp>` directory under `base`, adding a
/// numeric suffix when a directory of that name already exists.
pub async fn create_batch_dir(base: &Path, now: DateTime<Local>) -> Result<PathBuf> {
    let stem = format!("playlist_{}", now.format("%Y%m%d_%H%M%S"));
    tokio::fs::create_dir_all(base).await?;

    let mut candidate = base.join(&stem);
    let mut suffix = 1;
    loop {
        match tokio::fs::create_dir(&candidate).await {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                suffix += 1;
                candidate = base.join(format!("{}_{}", stem, suffix));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Runs the pipeline over the selected entries of a playlist, one at a time.
pub struct BatchOrchestrator<'a> {
    pipeline: &'a Pipeline,
    watermark_text: String,
    progress: Option<Arc<dyn ProgressSink>>,
    failure_report: Option<PathBuf>,
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(pipeline: &'a Pipeline, watermark_text: impl Into<String>) -> Self {
        Self {
            pipeline,
            watermark_text: watermark_text.into(),
            progress: None,
            failure_report: None,
        }
    }

    /// Receives `completed / selected * 100` after every selected entry.
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Appends failed entries to `path` once the batch is done.
    pub fn with_failure_report(mut self, path: PathBuf) -> Self {
        self.failure_report = Some(path);
        self
    }

    /// Processes `items` in order. A failing entry never stops the batch.
    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn run(&self, items: Vec<BatchItem>, output_dir: &Path) -> BatchReport {
        let selected = items.iter().filter(|i| i.is_selected()).count();
        info!("Found {} of {} entries selected for download", selected, items.len());

        let mut progress = BatchProgress::new(selected);
        let mut entries = Vec::with_capacity(items.len());

        for (index, item) in items.into_iter().enumerate() {
            let start = std::time::Instant::now();
            let outcome = match item.decision {
                EntryDecision::Skip => {
                    info!(index = index + 1, url = %item.entry.video_url, "skipping unselected entry");
                    entries.push(EntryReport {
                        video_url: item.entry.video_url,
                        title: item.entry.title,
                        outcome: None,
                    });
                    continue;
                }
                EntryDecision::Unresolved(error) => unresolved_outcome(error),
                EntryDecision::Download(choice) => {
                    info!(index = index + 1, url = %item.entry.video_url, "Starting download");
                    let job = PipelineJob {
                        source_url: item.entry.video_url.clone(),
                        video_format_id: choice.video_format_id,
                        audio_format_id: choice.audio_format_id,
                        output_dir: output_dir.to_path_buf(),
                        watermark: item.watermark,
                        watermark_text: self.watermark_text.clone(),
                        progress: None,
                    };
                    self.pipeline.run(job).await
                }
            };

            match &outcome.error {
                None => info!(
                    index = index + 1,
                    "Entry completed in {:.1}s",
                    start.elapsed().as_secs_f64()
                ),
                Some(e) => {
                    error!(index = index + 1, "Failed to download entry: {}", e);
                    progress.record_failure(&item.entry.video_url, e.to_string());
                }
            }
            progress.update(outcome.succeeded);

            if let Some(sink) = &self.progress {
                sink.on_progress(progress.percent());
            }

            entries.push(EntryReport {
                video_url: item.entry.video_url,
                title: item.entry.title,
                outcome: Some(outcome),
            });
        }

        let status = classify(progress.completed, selected);
        match status {
            BatchStatus::FullSuccess => info!("All {} selected entries downloaded", selected),
            BatchStatus::Partial => warn!(
                "Downloaded {} of {} selected entries",
                progress.completed, selected
            ),
            BatchStatus::AllFailed => error!("All {} selected entries failed", selected),
        }

        if let Some(path) = &self.failure_report {
            if let Err(e) = progress.export_failures(path) {
                error!("Failed to export failure report: {}", e);
            }
        }

        BatchReport {
            output_dir: output_dir.to_path_buf(),
            selected_count: selected,
            completed_count: progress.completed,
            entries,
            status,
            failures: progress.failures().to_vec(),
        }
    }
}

/// Failed outcome for an entry the pipeline never ran on.
fn unresolved_outcome(error: JobError) -> PipelineOutcome {
    PipelineOutcome {
        succeeded: false,
        output_path: None,
        error: Some(error),
        intermediate_file_retained: false,
        stages: vec![Stage::Failed],
    }
}
