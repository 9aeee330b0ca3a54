use crate::batch::{create_batch_dir, BatchItem, BatchOrchestrator, BatchReport, EntryDecision};
use crate::config::Config;
use crate::error::{AppError, JobError, Result};
use crate::ffmpeg::Ffmpeg;
use crate::format::CodecFamily;
use crate::pipeline::{Pipeline, PipelineJob, PipelineOutcome};
use crate::playlist::{EntryStatus, PlaylistEntry, PlaylistResolver};
use crate::progress::ProgressSink;
use crate::selector::{self, FormatChoice, SelectionResult};
use crate::services::{DownloadService, MetadataService, WatermarkRequest, WatermarkService};
use crate::ytdlp::YtDlp;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use yt_dlp::fetcher::deps::Libraries;
use yt_dlp::Youtube;

/// Application façade: owns the configuration and the external services,
/// and runs resolution, selection and pipelines on behalf of a caller.
///
/// # Fields
/// * `config` - Application configuration settings
/// * `metadata` - Metadata service used for selection and playlist expansion
/// * `watermarker` - Watermark service, also used for standalone files
/// * `pipeline` - Pipeline wired to the same services
pub struct Downloader {
    config: Arc<Config>,
    metadata: Arc<dyn MetadataService>,
    watermarker: Arc<dyn WatermarkService>,
    pipeline: Pipeline,
}

impl Downloader {
    /// Creates a new `Downloader` backed by the yt-dlp and ffmpeg binaries
    ///
    /// # Arguments
    /// * `config` - Configuration settings for the downloader
    ///
    /// # Errors
    /// * If directory creation fails
    /// * If the binaries cannot be installed or updated
    #[instrument(skip(config))]
    pub async fn new(config: Config) -> Result<Self> {
        for dir in [&config.output_dir, &config.input_dir, &config.libraries_dir] {
            tokio::fs::create_dir_all(dir).await?;
        }

        let (yt_dlp, ffmpeg) = Self::initialize_binaries(&config).await?;

        let ytdlp = Arc::new(YtDlp::new(yt_dlp, ffmpeg.clone()));
        let watermarker = Arc::new(Ffmpeg::new(ffmpeg, config.watermark.clone()));

        Ok(Self::with_services(config, ytdlp.clone(), ytdlp, watermarker))
    }

    /// Creates a `Downloader` over arbitrary service implementations
    pub fn with_services(
        config: Config,
        metadata: Arc<dyn MetadataService>,
        download: Arc<dyn DownloadService>,
        watermarker: Arc<dyn WatermarkService>,
    ) -> Self {
        let pipeline = Pipeline::new(
            Arc::clone(&metadata),
            download,
            Arc::clone(&watermarker),
            config.container.clone(),
        );

        Self {
            config: Arc::new(config),
            metadata,
            watermarker,
            pipeline,
        }
    }

    /// Makes sure the yt-dlp and ffmpeg binaries exist in the libraries directory
    ///
    /// # Returns
    /// * `Result<(PathBuf, PathBuf)>` - Paths of the yt-dlp and ffmpeg binaries
    ///
    /// # Details
    /// Checks for existing yt-dlp and ffmpeg binaries. If not found,
    /// downloads new ones. Otherwise, uses existing binaries and updates yt-dlp.
    async fn initialize_binaries(config: &Config) -> Result<(PathBuf, PathBuf)> {
        let yt_dlp = config.libraries_dir.join("yt-dlp");
        let ffmpeg = config.libraries_dir.join("ffmpeg");

        if !yt_dlp.exists() || !ffmpeg.exists() {
            info!("Installing yt-dlp and ffmpeg into {}", config.libraries_dir.display());
            Youtube::with_new_binaries(config.libraries_dir.clone(), config.output_dir.clone())
                .await?;
            return Ok((yt_dlp, ffmpeg));
        }

        let libraries = Libraries::new(yt_dlp.clone(), ffmpeg.clone());
        let youtube = Youtube::new(libraries, config.output_dir.clone())?;
        youtube.update_downloader().await?;

        Ok((yt_dlp, ffmpeg))
    }

    /// Returns a reference to the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn resolver(&self) -> PlaylistResolver {
        PlaylistResolver::new(Arc::clone(&self.metadata), self.config.unavailable_entries)
    }

    /// Resolves a URL into entries and fills each entry's title and formats
    ///
    /// # Returns
    /// * `Result<(bool, Vec<PlaylistEntry>)>` - Whether the URL was a playlist,
    ///   and its entries in `Ready` or `Error` status
    ///
    /// # Errors
    /// * `PlaylistExtraction` if a playlist cannot be expanded; failures of
    ///   individual entries are recorded in their status instead
    #[instrument(skip(self))]
    pub async fn inspect(&self, url: &str) -> Result<(bool, Vec<PlaylistEntry>)> {
        let (is_playlist, mut entries) = self.resolver().resolve_entries(url).await?;

        for entry in entries.iter_mut() {
            if entry.status != EntryStatus::Pending {
                continue;
            }
            match self.metadata.extract(&entry.video_url).await {
                Ok(metadata) => {
                    entry.title = Some(metadata.title);
                    entry.formats = Some(metadata.catalog);
                    entry.status = EntryStatus::Ready;
                }
                Err(e) => {
                    warn!(url = %entry.video_url, "Could not fetch formats: {}", e);
                    entry.status = EntryStatus::Error(e.to_string());
                }
            }
        }

        Ok((is_playlist, entries))
    }

    /// Runs the format selector on an inspected entry
    ///
    /// # Errors
    /// * `MetadataFetchFailed` if the entry has no formats
    /// * `NoAudioAvailable` / `NoVideoAvailable` from the selector
    pub fn select(&self, entry: &PlaylistEntry) -> Result<SelectionResult> {
        let catalog = entry.formats.as_ref().ok_or_else(|| {
            AppError::MetadataFetchFailed(match &entry.status {
                EntryStatus::Error(message) => message.clone(),
                _ => format!("no formats fetched for {}", entry.video_url),
            })
        })?;
        selector::select(catalog)
    }

    /// Downloads one video into the output directory with an explicit format pair
    ///
    /// # Arguments
    /// * `choice` - Usually `SelectionResult::choice` or `choice_for` a candidate
    /// * `progress` - Optional sink receiving the download percentage
    pub async fn download(
        &self,
        url: &str,
        choice: &FormatChoice,
        watermark: bool,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> PipelineOutcome {
        let job = PipelineJob {
            source_url: url.to_string(),
            video_format_id: choice.video_format_id.clone(),
            audio_format_id: choice.audio_format_id.clone(),
            output_dir: self.config.output_dir.clone(),
            watermark,
            watermark_text: self.config.watermark_text.clone().unwrap_or_default(),
            progress,
        };
        self.pipeline.run(job).await
    }

    /// Processes one URL unattended: every resolvable entry is downloaded with
    /// its best format pair
    ///
    /// # Details
    /// * Playlists go to a fresh `playlist_<timestamp>` subdirectory
    /// * Entries whose formats cannot be fetched or selected count as failed
    /// * Failures are appended to the configured failure report
    #[instrument(skip(self))]
    pub async fn process_url(&self, url: &str) -> Result<BatchReport> {
        let (is_playlist, entries) = self.inspect(url).await?;
        let watermark = self.config.watermark_text.is_some();

        let items: Vec<BatchItem> = entries
            .into_iter()
            .map(|entry| {
                let decision = match self.select(&entry) {
                    Ok(selection) => {
                        if selection.candidates.is_empty() {
                            info!(url = %entry.video_url, "No size-known equivalent formats, using best pair");
                        }
                        EntryDecision::Download(selection.choice())
                    }
                    Err(e) => {
                        warn!(url = %entry.video_url, kind = %e.kind(), "Cannot choose formats: {}", e);
                        EntryDecision::Unresolved(JobError::new(&e, None))
                    }
                };
                BatchItem {
                    entry,
                    decision,
                    watermark,
                }
            })
            .collect();

        let output_dir = if is_playlist {
            create_batch_dir(&self.config.output_dir, chrono::Local::now()).await?
        } else {
            tokio::fs::create_dir_all(&self.config.output_dir).await?;
            self.config.output_dir.clone()
        };

        let orchestrator = BatchOrchestrator::new(
            &self.pipeline,
            self.config.watermark_text.clone().unwrap_or_default(),
        )
        .with_failure_report(output_dir.join(&self.config.failure_report));

        Ok(orchestrator.run(items, &output_dir).await)
    }

    /// Processes a list of URLs one after another
    ///
    /// # Returns
    /// * `Vec<BatchReport>` - One report per URL that could be resolved
    ///
    /// # Details
    /// A URL that cannot be resolved is logged and skipped
    pub async fn process_urls(&self, urls: &[String]) -> Vec<BatchReport> {
        info!("Found {} URLs to process", urls.len());
        let mut reports = Vec::with_capacity(urls.len());

        for url in urls {
            match self.process_url(url).await {
                Ok(report) => reports.push(report),
                Err(e) => error!(url = %url, kind = %e.kind(), "Failed to process URL: {}", e),
            }
        }

        let selected: usize = reports.iter().map(|r| r.selected_count).sum();
        let completed: usize = reports.iter().map(|r| r.completed_count).sum();
        info!(
            "Download Summary: {} successful, {} failed",
            completed,
            selected - completed
        );

        reports
    }

    /// Burns the watermark into an existing local video file
    ///
    /// # Arguments
    /// * `input` - Video file to watermark, left untouched
    /// * `output` - Destination of the watermarked copy
    /// * `source_codec` - Codec of the input video, picks the encoder family
    /// * `bitrate_kbps` - Rate-control target; constant quality when `None`
    #[instrument(skip(self))]
    pub async fn watermark_file(
        &self,
        input: &Path,
        output: &Path,
        text: &str,
        source_codec: &str,
        bitrate_kbps: Option<u64>,
    ) -> Result<()> {
        if !input.exists() {
            return Err(AppError::Custom(format!(
                "input file {} does not exist",
                input.display()
            )));
        }

        let request = WatermarkRequest {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            text: text.to_string(),
            family: CodecFamily::encode_target(source_codec),
            bitrate_hint_kbps: bitrate_kbps,
            tags: None,
        };

        self.watermarker
            .apply_watermark(&request)
            .await
            .map_err(|e| AppError::WatermarkFailed {
                message: e.to_string(),
                intermediate: input.to_path_buf(),
            })
    }
}
