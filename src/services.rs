//! External collaborators of the pipeline: metadata extraction, download+mux
//! and watermark re-encoding. Production implementations live in `ytdlp` and
//! `ffmpeg`; tests substitute in-memory fakes.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;

use crate::error::Result;
use crate::format::{CodecFamily, FormatCatalog, FormatDescriptor};
use crate::progress::MonotonicProgress;

/// What the metadata service knows about one video.
#[derive(Debug, Clone)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    pub catalog: FormatCatalog,
}

/// Result of a flat (no per-video extraction) playlist query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlatPlaylist {
    #[serde(default)]
    pub title: Option<String>,
    /// `None` when the service returned no entries collection at all.
    #[serde(default)]
    pub entries: Option<Vec<FlatEntry>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlatEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub webpage_url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl FlatEntry {
    /// `url` if present, else `webpage_url`.
    pub fn video_url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .filter(|u| !u.is_empty())
            .or_else(|| self.webpage_url.as_deref().filter(|u| !u.is_empty()))
    }
}

/// Bitrates written into the container, both globally and per stream.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataTags {
    /// kbps
    pub video_bitrate: f64,
    /// kbps
    pub audio_bitrate: f64,
}

impl MetadataTags {
    pub fn new(video: &FormatDescriptor, audio: &FormatDescriptor) -> Self {
        Self {
            video_bitrate: video.total_bitrate,
            audio_bitrate: audio.average_audio_bitrate,
        }
    }

    /// ffmpeg output options that write the tags.
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let video = format!("{}k", self.video_bitrate.round() as u64);
        let audio = format!("{}k", self.audio_bitrate.round() as u64);
        vec![
            "-metadata".into(),
            format!("video_bitrate={}", video),
            "-metadata".into(),
            format!("audio_bitrate={}", audio),
            "-metadata:s:v:0".into(),
            format!("bitrate={}", video),
            "-metadata:s:a:0".into(),
            format!("bitrate={}", audio),
        ]
    }
}

/// One fetch-and-mux request.
#[derive(Debug, Clone)]
pub struct MuxRequest {
    pub url: String,
    pub video_format_id: String,
    pub audio_format_id: String,
    pub destination: PathBuf,
    pub container: String,
    pub tags: MetadataTags,
}

/// One watermark re-encode request.
#[derive(Debug, Clone)]
pub struct WatermarkRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub text: String,
    pub family: CodecFamily,
    pub bitrate_hint_kbps: Option<u64>,
    /// Re-applied to the output when present.
    pub tags: Option<MetadataTags>,
}

#[async_trait]
pub trait MetadataService: Send + Sync {
    async fn extract(&self, url: &str) -> Result<VideoMetadata>;

    async fn extract_flat(&self, playlist_url: &str) -> Result<FlatPlaylist>;
}

#[async_trait]
pub trait DownloadService: Send + Sync {
    /// Downloads both formats and muxes them into `request.destination`,
    /// clearing existing metadata and writing `request.tags`.
    async fn fetch_and_mux(&self, request: &MuxRequest, progress: &MonotonicProgress) -> Result<()>;
}

#[async_trait]
pub trait WatermarkService: Send + Sync {
    /// Burns `request.text` into the video stream; audio is stream-copied.
    async fn apply_watermark(&self, request: &WatermarkRequest) -> Result<()>;
}
