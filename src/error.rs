use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::Stage;

/// Error types for the application.
///
/// Defines one error enum for the whole crate that covers:
/// - IO operations and external tool invocations
/// - Format selection on an empty catalog
/// - Playlist expansion
/// - Every stage of the download pipeline

/// Represents all possible errors that can occur in the application.
///
/// # Error Categories
///
/// - Infrastructure: IO, JSON decoding, binary bootstrap, subprocess failures
/// - Selection: no audio-only / video-only format in a catalog
/// - Pipeline: one variant per failing stage, see [`ErrorKind`]
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Youtube error: {0}")]
    Youtube(#[from] yt_dlp::error::Error),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("no audio-only format available")]
    NoAudioAvailable,

    #[error("no video-only format available")]
    NoVideoAvailable,

    #[error("playlist extraction failed: {0}")]
    PlaylistExtraction(String),

    #[error("metadata fetch failed: {0}")]
    MetadataFetchFailed(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("watermark failed: {message} (intermediate file kept at {})", intermediate.display())]
    WatermarkFailed { message: String, intermediate: PathBuf },

    #[error("finalize failed: {0}")]
    FinalizeFailed(String),

    #[error("job cancelled before {0}")]
    Cancelled(Stage),

    #[error("{0}")]
    Custom(String),
}

/// Taxonomy code of an [`AppError`], for callers that branch on the kind of
/// failure instead of its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoAudioAvailable,
    NoVideoAvailable,
    PlaylistExtractionError,
    MetadataFetchFailed,
    DownloadFailed,
    WatermarkFailed,
    FinalizeFailed,
    Cancelled,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::NoAudioAvailable => "NoAudioAvailable",
            Self::NoVideoAvailable => "NoVideoAvailable",
            Self::PlaylistExtractionError => "PlaylistExtractionError",
            Self::MetadataFetchFailed => "MetadataFetchFailed",
            Self::DownloadFailed => "DownloadFailed",
            Self::WatermarkFailed => "WatermarkFailed",
            Self::FinalizeFailed => "FinalizeFailed",
            Self::Cancelled => "Cancelled",
            Self::Other => "Other",
        };
        f.write_str(code)
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoAudioAvailable => ErrorKind::NoAudioAvailable,
            Self::NoVideoAvailable => ErrorKind::NoVideoAvailable,
            Self::PlaylistExtraction(_) => ErrorKind::PlaylistExtractionError,
            Self::MetadataFetchFailed(_) => ErrorKind::MetadataFetchFailed,
            Self::DownloadFailed(_) => ErrorKind::DownloadFailed,
            Self::WatermarkFailed { .. } => ErrorKind::WatermarkFailed,
            Self::FinalizeFailed(_) => ErrorKind::FinalizeFailed,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Io(_) | Self::Json(_) | Self::Youtube(_) | Self::Tool(_) | Self::Custom(_) => {
                ErrorKind::Other
            }
        }
    }
}

impl From<&str> for AppError {
    fn from(error: &str) -> Self {
        AppError::Custom(error.to_string())
    }
}

impl From<String> for AppError {
    fn from(error: String) -> Self {
        AppError::Custom(error)
    }
}

/// Cloneable snapshot of a job failure, stored in a
/// [`PipelineOutcome`](crate::pipeline::PipelineOutcome).
#[derive(Debug, Clone, PartialEq)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
    /// Path of the downloaded intermediate file when it was left on disk.
    pub intermediate_path: Option<PathBuf>,
}

impl JobError {
    pub fn new(error: &AppError, intermediate_path: Option<PathBuf>) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            intermediate_path,
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
