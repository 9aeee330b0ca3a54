use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::error::{AppError, JobError, Result};
use crate::format::{CodecFamily, FormatDescriptor};
use crate::progress::{MonotonicProgress, ProgressSink};
use crate::services::{
    DownloadService, MetadataService, MetadataTags, MuxRequest, WatermarkRequest,
    WatermarkService,
};

/// Stages of one pipeline job, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FetchingMetadata,
    Downloading,
    /// Muxing is done by the download service in the same call.
    Merging,
    Watermarking,
    Tagging,
    Cleanup,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FetchingMetadata => "FETCHING_METADATA",
            Self::Downloading => "DOWNLOADING",
            Self::Merging => "MERGING",
            Self::Watermarking => "WATERMARKING",
            Self::Tagging => "TAGGING",
            Self::Cleanup => "CLEANUP",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// One download request.
#[derive(Clone)]
pub struct PipelineJob {
    pub source_url: String,
    pub video_format_id: String,
    pub audio_format_id: String,
    pub output_dir: PathBuf,
    pub watermark: bool,
    pub watermark_text: String,
    pub progress: Option<Arc<dyn ProgressSink>>,
}

impl fmt::Debug for PipelineJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineJob")
            .field("source_url", &self.source_url)
            .field("video_format_id", &self.video_format_id)
            .field("audio_format_id", &self.audio_format_id)
            .field("output_dir", &self.output_dir)
            .field("watermark", &self.watermark)
            .finish_non_exhaustive()
    }
}

/// Terminal result of a [`PipelineJob`].
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    pub succeeded: bool,
    pub output_path: Option<PathBuf>,
    pub error: Option<JobError>,
    /// True when the downloaded intermediate file is still on disk.
    pub intermediate_file_retained: bool,
    /// Stages entered, ending with `Done` or `Failed`.
    pub stages: Vec<Stage>,
}

/// Cooperative cancellation, checked between stages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Replaces path separators so a title can be used as a file name.
///
/// # Examples
///
/// ```
/// use ytmark::pipeline::sanitize_title;
///
/// assert_eq!(sanitize_title("AC/DC \\ Live"), "AC_DC _ Live");
/// ```
pub fn sanitize_title(title: &str) -> String {
    title.replace(['/', '\\'], "_")
}

/// File name stem of a job: the sanitized title, else the video id, else
/// `video_<video>+<audio>` so the name is never empty.
pub fn file_stem(title: &str, id: &str, video_format_id: &str, audio_format_id: &str) -> String {
    [title, id]
        .into_iter()
        .map(str::trim)
        .find(|name| !name.is_empty())
        .map(sanitize_title)
        .unwrap_or_else(|| {
            sanitize_title(&format!("video_{}+{}", video_format_id, audio_format_id))
        })
}

/// `<title>_temp.<ext>` and `<title>.<ext>` under `dir`.
pub fn job_paths(dir: &Path, safe_title: &str, container: &str) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("{}_temp.{}", safe_title, container)),
        dir.join(format!("{}.{}", safe_title, container)),
    )
}

/// Drives jobs through fetch → download+mux → watermark → tag → cleanup.
pub struct Pipeline {
    metadata: Arc<dyn MetadataService>,
    downloader: Arc<dyn DownloadService>,
    watermarker: Arc<dyn WatermarkService>,
    container: String,
    cancel: Option<CancelFlag>,
}

/// Mutable state of one run, used to build the outcome.
struct Run {
    stages: Vec<Stage>,
    temp_path: Option<PathBuf>,
}

impl Run {
    fn enter(&mut self, stage: Stage) {
        info!(stage = %stage, "pipeline stage");
        self.stages.push(stage);
    }
}

impl Pipeline {
    pub fn new(
        metadata: Arc<dyn MetadataService>,
        downloader: Arc<dyn DownloadService>,
        watermarker: Arc<dyn WatermarkService>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            metadata,
            downloader,
            watermarker,
            container: container.into(),
            cancel: None,
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Runs one job to a terminal state. Never panics on job failure; every
    /// error is reported in the outcome.
    #[instrument(skip(self, job), fields(url = %job.source_url))]
    pub async fn run(&self, job: PipelineJob) -> PipelineOutcome {
        let mut run = Run {
            stages: Vec::new(),
            temp_path: None,
        };

        match self.execute(&job, &mut run).await {
            Ok(output_path) => {
                run.enter(Stage::Done);
                info!(output = %output_path.display(), "job finished");
                PipelineOutcome {
                    succeeded: true,
                    output_path: Some(output_path),
                    error: None,
                    intermediate_file_retained: run.temp_path.is_some_and(|p| p.exists()),
                    stages: run.stages,
                }
            }
            Err(error) => {
                let retained = run.temp_path.filter(|p| p.exists());
                warn!(kind = %error.kind(), "job failed: {}", error);
                run.stages.push(Stage::Failed);
                PipelineOutcome {
                    succeeded: false,
                    output_path: None,
                    error: Some(JobError::new(&error, retained.clone())),
                    intermediate_file_retained: retained.is_some(),
                    stages: run.stages,
                }
            }
        }
    }

    fn checkpoint(&self, next: Stage) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.is_cancelled() => Err(AppError::Cancelled(next)),
            _ => Ok(()),
        }
    }

    async fn execute(&self, job: &PipelineJob, run: &mut Run) -> Result<PathBuf> {
        run.enter(Stage::FetchingMetadata);
        let metadata = self
            .metadata
            .extract(&job.source_url)
            .await
            .map_err(|e| AppError::MetadataFetchFailed(e.to_string()))?;

        let video = confirm_format(metadata.catalog.find(&job.video_format_id), &job.video_format_id)?;
        let audio = confirm_format(metadata.catalog.find(&job.audio_format_id), &job.audio_format_id)?;

        let safe_title = file_stem(
            &metadata.title,
            &metadata.id,
            &video.format_id,
            &audio.format_id,
        );
        let (temp_path, final_path) = job_paths(&job.output_dir, &safe_title, &self.container);
        let tags = MetadataTags::new(video, audio);

        self.checkpoint(Stage::Downloading)?;
        run.enter(Stage::Downloading);
        run.temp_path = Some(temp_path.clone());

        tokio::fs::create_dir_all(&job.output_dir)
            .await
            .map_err(|e| AppError::DownloadFailed(format!("creating {}: {}", job.output_dir.display(), e)))?;

        let progress = MonotonicProgress::new(job.progress.clone());
        let request = MuxRequest {
            url: job.source_url.clone(),
            video_format_id: video.format_id.clone(),
            audio_format_id: audio.format_id.clone(),
            destination: temp_path.clone(),
            container: self.container.clone(),
            tags: tags.clone(),
        };
        self.downloader
            .fetch_and_mux(&request, &progress)
            .await
            .map_err(|e| AppError::DownloadFailed(e.to_string()))?;
        run.enter(Stage::Merging);
        progress.finish();

        if job.watermark {
            self.checkpoint(Stage::Watermarking)?;
            run.enter(Stage::Watermarking);

            let request = WatermarkRequest {
                input: temp_path.clone(),
                output: final_path.clone(),
                text: job.watermark_text.clone(),
                family: CodecFamily::encode_target(&video.video_codec),
                bitrate_hint_kbps: bitrate_hint(video),
                tags: Some(tags),
            };
            self.watermarker
                .apply_watermark(&request)
                .await
                .map_err(|e| AppError::WatermarkFailed {
                    message: e.to_string(),
                    intermediate: temp_path.clone(),
                })?;
            run.enter(Stage::Tagging);

            run.enter(Stage::Cleanup);
            match tokio::fs::remove_file(&temp_path).await {
                Ok(()) => run.temp_path = None,
                Err(e) => warn!(
                    "Could not delete intermediate file {}: {}",
                    temp_path.display(),
                    e
                ),
            }
        } else {
            self.checkpoint(Stage::Cleanup)?;
            run.enter(Stage::Tagging);

            run.enter(Stage::Cleanup);
            tokio::fs::rename(&temp_path, &final_path)
                .await
                .map_err(|e| {
                    AppError::FinalizeFailed(format!(
                        "renaming {} to {}: {}",
                        temp_path.display(),
                        final_path.display(),
                        e
                    ))
                })?;
            run.temp_path = None;
        }

        Ok(final_path)
    }
}

fn confirm_format<'a>(
    format: Option<&'a FormatDescriptor>,
    format_id: &str,
) -> Result<&'a FormatDescriptor> {
    format.ok_or_else(|| {
        AppError::MetadataFetchFailed(format!("format {} is no longer offered", format_id))
    })
}

/// Known video bitrate in whole kbps, if any.
fn bitrate_hint(video: &FormatDescriptor) -> Option<u64> {
    let kbps = video.total_bitrate.round();
    (kbps >= 1.0).then_some(kbps as u64)
}
