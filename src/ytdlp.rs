use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::error::{AppError, Result};
use crate::format::{FormatCatalog, RawFormat};
use crate::progress::MonotonicProgress;
use crate::services::{
    DownloadService, FlatPlaylist, MetadataService, MuxRequest, VideoMetadata,
};

/// Prefix of the lines printed through `--progress-template`.
const PROGRESS_PREFIX: &str = "[ytmark-progress]";

/// Metadata and download service backed by the `yt-dlp` binary.
///
/// Merging is delegated to yt-dlp, which runs the `ffmpeg` binary given here.
pub struct YtDlp {
    binary: PathBuf,
    ffmpeg: PathBuf,
}

#[derive(Debug, Deserialize)]
struct VideoJson {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    formats: Vec<RawFormat>,
}

impl YtDlp {
    pub fn new(binary: impl Into<PathBuf>, ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            ffmpeg: ffmpeg.into(),
        }
    }

    /// Runs yt-dlp to completion and returns its stdout.
    async fn run_json(&self, args: &[&str]) -> Result<Vec<u8>> {
        debug!(binary = %self.binary.display(), ?args, "running yt-dlp");

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Tool(format!(
                "yt-dlp exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(output.stdout)
    }

    /// Arguments of a fetch-and-mux run.
    pub fn mux_args(&self, request: &MuxRequest) -> Vec<String> {
        let mut postprocessor = String::from("Merger+ffmpeg_o:-map_metadata -1");
        for arg in request.tags.ffmpeg_args() {
            postprocessor.push(' ');
            postprocessor.push_str(&arg);
        }

        vec![
            "--no-playlist".into(),
            "--no-warnings".into(),
            "--newline".into(),
            "--force-overwrites".into(),
            "-f".into(),
            format!("{}+{}", request.video_format_id, request.audio_format_id),
            "--merge-output-format".into(),
            request.container.clone(),
            "--ffmpeg-location".into(),
            self.ffmpeg.to_string_lossy().into_owned(),
            "--postprocessor-args".into(),
            postprocessor,
            "--progress-template".into(),
            format!(
                "download:{} %(progress.downloaded_bytes)s %(progress.total_bytes,progress.total_bytes_estimate)s",
                PROGRESS_PREFIX
            ),
            "-o".into(),
            output_template(&request.destination),
            request.url.clone(),
        ]
    }
}

/// yt-dlp treats `-o` as a template, so literal `%` must be doubled.
fn output_template(path: &Path) -> String {
    path.to_string_lossy().replace('%', "%%")
}

/// Parses a progress line into `(downloaded_bytes, total_bytes)`.
///
/// yt-dlp prints `NA` for unknown fields and may print floats for estimates.
pub fn parse_progress_line(line: &str) -> Option<(u64, Option<u64>)> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    let mut fields = rest.split_whitespace();

    let parse = |field: &str| -> Option<u64> {
        field
            .parse::<u64>()
            .ok()
            .or_else(|| field.parse::<f64>().ok().map(|v| v.max(0.0) as u64))
    };

    let downloaded = parse(fields.next()?)?;
    let total = fields.next().and_then(parse);
    Some((downloaded, total))
}

#[async_trait]
impl MetadataService for YtDlp {
    #[instrument(skip(self))]
    async fn extract(&self, url: &str) -> Result<VideoMetadata> {
        let stdout = self
            .run_json(&[
                "--dump-single-json",
                "--skip-download",
                "--no-playlist",
                "--no-warnings",
                url,
            ])
            .await?;

        let video: VideoJson = serde_json::from_slice(&stdout)?;
        let id = video.id.unwrap_or_default();

        Ok(VideoMetadata {
            title: video
                .title
                .filter(|title| !title.trim().is_empty())
                .unwrap_or_else(|| id.clone()),
            id,
            catalog: FormatCatalog::from_raw(video.formats),
        })
    }

    #[instrument(skip(self))]
    async fn extract_flat(&self, playlist_url: &str) -> Result<FlatPlaylist> {
        let stdout = self
            .run_json(&[
                "--flat-playlist",
                "--dump-single-json",
                "--no-warnings",
                playlist_url,
            ])
            .await?;

        Ok(serde_json::from_slice(&stdout)?)
    }
}

/// Forwards `--progress-template` lines until yt-dlp closes stdout.
async fn read_progress<R>(stdout: R, progress: &MonotonicProgress) -> std::io::Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stdout).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some((downloaded, total)) = parse_progress_line(&line) {
            progress.report_bytes(downloaded, total);
        }
    }
    Ok(())
}

#[async_trait]
impl DownloadService for YtDlp {
    #[instrument(skip(self, request, progress), fields(url = %request.url))]
    async fn fetch_and_mux(&self, request: &MuxRequest, progress: &MonotonicProgress) -> Result<()> {
        let args = self.mux_args(request);
        debug!(binary = %self.binary.display(), ?args, "running yt-dlp");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buffer = String::new();
                let _ = stderr.read_to_string(&mut buffer).await;
                buffer
            })
        });

        if let Some(stdout) = child.stdout.take() {
            if let Err(e) = read_progress(stdout, progress).await {
                // the child must not keep writing the destination after we give up
                if let Err(kill_error) = child.kill().await {
                    warn!("Could not stop yt-dlp: {}", kill_error);
                }
                if let Some(task) = stderr_task {
                    task.abort();
                }
                return Err(AppError::Tool(format!("reading yt-dlp output: {}", e)));
            }
        }

        let status = child.wait().await?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(AppError::Tool(format!(
                "yt-dlp exited with {}: {}",
                status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MetadataTags;

    #[test]
    fn test_parse_progress_line() {
        assert_eq!(
            parse_progress_line("[ytmark-progress] 1024 4096"),
            Some((1024, Some(4096)))
        );
        assert_eq!(
            parse_progress_line("[ytmark-progress] 1024 NA"),
            Some((1024, None))
        );
        assert_eq!(
            parse_progress_line("[ytmark-progress] 10 52428800.5"),
            Some((10, Some(52_428_800)))
        );
        assert_eq!(parse_progress_line("[ytmark-progress] NA NA"), None);
        assert_eq!(parse_progress_line("[Merger] Merging formats into"), None);
    }

    #[test]
    fn test_mux_args() {
        let ytdlp = YtDlp::new("libs/yt-dlp", "libs/ffmpeg");
        let request = MuxRequest {
            url: "https://www.youtube.com/watch?v=abc123".into(),
            video_format_id: "303".into(),
            audio_format_id: "251".into(),
            destination: PathBuf::from("out/100% Song_temp.mp4"),
            container: "mp4".into(),
            tags: MetadataTags {
                video_bitrate: 4400.0,
                audio_bitrate: 130.0,
            },
        };

        let args = ytdlp.mux_args(&request);
        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();

        assert_eq!(args[pos("-f") + 1], "303+251");
        assert_eq!(args[pos("--merge-output-format") + 1], "mp4");
        assert_eq!(args[pos("-o") + 1], "out/100%% Song_temp.mp4");
        assert!(args[pos("--postprocessor-args") + 1]
            .starts_with("Merger+ffmpeg_o:-map_metadata -1 -metadata video_bitrate=4400k"));
        assert_eq!(args.last().unwrap(), "https://www.youtube.com/watch?v=abc123");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_output_stops_the_child() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let script = dir.path().join("yt-dlp");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\necho $$ > '{}'\nprintf '\\377\\376\\n'\nexec sleep 30\n",
                pid_file.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let ytdlp = YtDlp::new(script.clone(), "ffmpeg");
        let request = MuxRequest {
            url: "https://www.youtube.com/watch?v=abc123".into(),
            video_format_id: "248".into(),
            audio_format_id: "251".into(),
            destination: dir.path().join("clip_temp.mp4"),
            container: "mp4".into(),
            tags: MetadataTags {
                video_bitrate: 2500.0,
                audio_bitrate: 135.0,
            },
        };
        let progress = MonotonicProgress::new(None);

        let started = std::time::Instant::now();
        let error = ytdlp.fetch_and_mux(&request, &progress).await.unwrap_err();

        assert!(matches!(error, AppError::Tool(_)), "{}", error);
        assert!(started.elapsed() < std::time::Duration::from_secs(20));
        let pid = std::fs::read_to_string(&pid_file).unwrap();
        assert!(!Path::new(&format!("/proc/{}", pid.trim())).exists());
    }

    #[test]
    fn test_flat_playlist_json() {
        let json = r#"{"_type": "playlist", "title": "Mix", "entries": [
            {"id": "a", "url": "https://www.youtube.com/watch?v=a", "title": "A"},
            {"id": "b", "webpage_url": "https://www.youtube.com/watch?v=b"},
            {"id": "c"}
        ]}"#;
        let playlist: FlatPlaylist = serde_json::from_str(json).unwrap();
        let entries = playlist.entries.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].video_url(), Some("https://www.youtube.com/watch?v=b"));
        assert_eq!(entries[2].video_url(), None);

        let single: FlatPlaylist = serde_json::from_str(r#"{"title": "not a playlist"}"#).unwrap();
        assert!(single.entries.is_none());
    }
}
