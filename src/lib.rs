//! Video download pipeline with format selection and moving text watermarks.
//!
//! This library picks the best audio and video formats of a video, downloads
//! and muxes them through yt-dlp, optionally burns a moving watermark in with
//! ffmpeg, and runs whole playlists as sequential batches.
//!
//! # Architecture
//!
//! The application is structured into several key components:
//! - `format` / `selector`: Format catalog and pure selection functions
//! - `playlist`: Playlist detection and expansion
//! - `pipeline`: The per-video download → watermark → cleanup state machine
//! - `batch`: Sequential playlist runs with partial-failure isolation
//! - `services`: Traits for the external tools, implemented by `ytdlp` and `ffmpeg`
//! - `Downloader`: Application façade wiring everything from a `Config`
//!
//! # Example
//! ```no_run
//! use ytmark::{Config, Downloader};
//!
//! async fn example() {
//!     let config = Config::default();
//!     let downloader = Downloader::new(config).await.unwrap();
//!     let report = downloader
//!         .process_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
//!         .await
//!         .unwrap();
//!     println!("{} of {} downloaded", report.completed_count, report.selected_count);
//! }
//! ```

pub mod batch;
pub mod config;
pub mod downloader;
pub mod error;
pub mod ffmpeg;
pub mod format;
pub mod pipeline;
pub mod playlist;
pub mod progress;
pub mod selector;
pub mod services;
pub mod ytdlp;

// Re-export commonly used items
pub use batch::{BatchItem, BatchOrchestrator, BatchReport, BatchStatus, EntryDecision};
pub use config::Config;
pub use downloader::Downloader;
pub use error::{AppError, ErrorKind, JobError};
pub use format::{CodecFamily, FormatCatalog, FormatDescriptor};
pub use pipeline::{CancelFlag, Pipeline, PipelineJob, PipelineOutcome, Stage};
pub use playlist::{EntryStatus, PlaylistEntry, PlaylistResolver};
pub use progress::{BatchProgress, ProgressSink};
pub use selector::{FormatChoice, SelectionResult};
