//! In-memory stand-ins for yt-dlp and ffmpeg used by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use ytmark::error::{AppError, Result};
use ytmark::pipeline::PipelineJob;
use ytmark::progress::MonotonicProgress;
use ytmark::services::{
    DownloadService, FlatEntry, FlatPlaylist, MetadataService, MuxRequest, VideoMetadata,
    WatermarkRequest, WatermarkService,
};
use ytmark::{CancelFlag, FormatCatalog, FormatDescriptor, Pipeline, ProgressSink};

pub fn video(id: &str, codec: &str, height: u32, fps: f64, tbr: f64) -> FormatDescriptor {
    FormatDescriptor {
        format_id: id.to_string(),
        video_codec: codec.to_string(),
        audio_codec: "none".to_string(),
        height,
        fps,
        average_audio_bitrate: 0.0,
        total_bitrate: tbr,
        file_size: Some(10_000_000),
        file_size_approx: None,
        format_note: format!("{}p", height),
        extension: "mp4".to_string(),
    }
}

pub fn audio(id: &str, abr: f64) -> FormatDescriptor {
    FormatDescriptor {
        format_id: id.to_string(),
        video_codec: "none".to_string(),
        audio_codec: "opus".to_string(),
        height: 0,
        fps: 0.0,
        average_audio_bitrate: abr,
        total_bitrate: abr,
        file_size: Some(1_000_000),
        file_size_approx: None,
        format_note: "medium".to_string(),
        extension: "webm".to_string(),
    }
}

/// 1080p in both families plus two audio tracks.
pub fn catalog() -> FormatCatalog {
    FormatCatalog::new(vec![
        audio("140", 129.0),
        audio("251", 135.0),
        video("137", "avc1.640028", 1080, 30.0, 4400.0),
        video("248", "vp9", 1080, 30.0, 2500.0),
        video("136", "avc1.4d401f", 720, 30.0, 2000.0),
    ])
}

pub fn metadata(id: &str, title: &str) -> VideoMetadata {
    VideoMetadata {
        id: id.to_string(),
        title: title.to_string(),
        catalog: catalog(),
    }
}

#[derive(Default)]
pub struct FakeMetadata {
    pub videos: HashMap<String, VideoMetadata>,
    pub playlists: HashMap<String, FlatPlaylist>,
}

impl FakeMetadata {
    pub fn with_video(mut self, url: &str, title: &str) -> Self {
        let id = url.rsplit('=').next().unwrap_or(url);
        self.videos.insert(url.to_string(), metadata(id, title));
        self
    }

    pub fn with_playlist(mut self, url: &str, entries: Option<Vec<FlatEntry>>) -> Self {
        self.playlists.insert(
            url.to_string(),
            FlatPlaylist {
                title: Some("Playlist".to_string()),
                entries,
            },
        );
        self
    }
}

pub fn flat(url: Option<&str>, webpage_url: Option<&str>) -> FlatEntry {
    FlatEntry {
        id: None,
        url: url.map(str::to_string),
        webpage_url: webpage_url.map(str::to_string),
        title: None,
    }
}

#[async_trait]
impl MetadataService for FakeMetadata {
    async fn extract(&self, url: &str) -> Result<VideoMetadata> {
        self.videos
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::Tool(format!("video unavailable: {}", url)))
    }

    async fn extract_flat(&self, playlist_url: &str) -> Result<FlatPlaylist> {
        self.playlists
            .get(playlist_url)
            .cloned()
            .ok_or_else(|| AppError::Tool(format!("playlist unavailable: {}", playlist_url)))
    }
}

/// Writes a small file at the destination and reports 25%, 75% then a
/// stale 50%.
#[derive(Default)]
pub struct FakeDownload {
    pub failing_urls: HashSet<String>,
    pub requests: Mutex<Vec<MuxRequest>>,
    /// Raised once the destination has been written.
    pub cancel_when_done: Option<CancelFlag>,
}

impl FakeDownload {
    pub fn failing(urls: &[&str]) -> Self {
        Self {
            failing_urls: urls.iter().map(|u| u.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn cancelling(flag: CancelFlag) -> Self {
        Self {
            cancel_when_done: Some(flag),
            ..Self::default()
        }
    }
}

#[async_trait]
impl DownloadService for FakeDownload {
    async fn fetch_and_mux(&self, request: &MuxRequest, progress: &MonotonicProgress) -> Result<()> {
        self.requests.lock().unwrap().push(request.clone());
        if self.failing_urls.contains(&request.url) {
            return Err(AppError::Tool("HTTP Error 403: Forbidden".to_string()));
        }

        progress.report_bytes(25, Some(100));
        progress.report_bytes(75, Some(100));
        progress.report_bytes(50, Some(100));
        tokio::fs::write(&request.destination, b"muxed").await?;
        if let Some(flag) = &self.cancel_when_done {
            flag.cancel();
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeWatermark {
    pub fail: bool,
    pub requests: Mutex<Vec<WatermarkRequest>>,
}

impl FakeWatermark {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl WatermarkService for FakeWatermark {
    async fn apply_watermark(&self, request: &WatermarkRequest) -> Result<()> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(AppError::Tool("ffmpeg exited with status 1".to_string()));
        }
        let input = tokio::fs::read(&request.input).await?;
        let mut output = input;
        output.extend_from_slice(request.text.as_bytes());
        tokio::fs::write(&request.output, output).await?;
        Ok(())
    }
}

pub fn pipeline(
    metadata: Arc<FakeMetadata>,
    download: Arc<FakeDownload>,
    watermark: Arc<FakeWatermark>,
) -> Pipeline {
    Pipeline::new(metadata, download, watermark, "mp4")
}

pub fn job(url: &str, output_dir: &Path, watermark: bool) -> PipelineJob {
    PipelineJob {
        source_url: url.to_string(),
        video_format_id: "248".to_string(),
        audio_format_id: "251".to_string(),
        output_dir: output_dir.to_path_buf(),
        watermark,
        watermark_text: "sample".to_string(),
        progress: None,
    }
}

/// Sink that records every pushed value.
pub fn recorder() -> (Arc<Mutex<Vec<f64>>>, Arc<dyn ProgressSink>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink: Arc<dyn ProgressSink> = {
        let seen = Arc::clone(&seen);
        Arc::new(move |p: f64| seen.lock().unwrap().push(p))
    };
    (seen, sink)
}
