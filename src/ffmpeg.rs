use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::config::WatermarkStyle;
use crate::error::{AppError, Result};
use crate::format::CodecFamily;
use crate::services::{WatermarkRequest, WatermarkService};

/// Watermark service backed by the `ffmpeg` binary.
///
/// Draws the text with the `drawtext` filter, moving diagonally with time,
/// re-encodes video in the source's codec family and stream-copies audio.
pub struct Ffmpeg {
    binary: PathBuf,
    style: WatermarkStyle,
}

impl Ffmpeg {
    pub fn new(binary: impl Into<PathBuf>, style: WatermarkStyle) -> Self {
        Self {
            binary: binary.into(),
            style,
        }
    }

    fn encoder(family: CodecFamily) -> &'static str {
        match family {
            CodecFamily::Vp9 => "libvpx-vp9",
            CodecFamily::Avc => "libx264",
        }
    }

    /// The `drawtext` filter expression.
    pub fn filter(&self, text: &str) -> String {
        format!(
            "drawtext=text='{}':font={}:fontcolor={}:fontsize={}:x='mod(t*{},w)':y='mod(t*{},h)'",
            escape_drawtext(text),
            self.style.font,
            self.style.font_color,
            self.style.font_size,
            self.style.x_speed,
            self.style.y_speed,
        )
    }

    /// Full ffmpeg argument list for a request.
    pub fn args(&self, request: &WatermarkRequest) -> Vec<String> {
        let mut args: Vec<String> = vec![
            String::from("-hide_banner"),
            String::from("-loglevel"),
            String::from("error"),
            String::from("-y"),
            String::from("-i"),
            request.input.to_string_lossy().into_owned(),
            String::from("-vf"),
            self.filter(&request.text),
            String::from("-c:v"),
            Self::encoder(request.family).into(),
        ];

        match request.bitrate_hint_kbps.filter(|b| *b > 0) {
            Some(kbps) => {
                args.extend([
                    String::from("-b:v"),
                    format!("{}k", kbps),
                    String::from("-maxrate"),
                    format!("{}k", kbps),
                ]);
            }
            None => {
                args.extend([String::from("-crf"), self.style.crf.to_string()]);
                if request.family == CodecFamily::Vp9 {
                    // libvpx only honours -crf in constrained quality mode
                    args.extend([String::from("-b:v"), String::from("0")]);
                }
                args.extend([String::from("-maxrate"), self.style.fallback_maxrate.clone()]);
            }
        }

        args.extend([
            String::from("-g"),
            self.style.gop.to_string(),
            String::from("-bufsize"),
            self.style.bufsize.clone(),
            String::from("-c:a"),
            String::from("copy"),
            String::from("-map_metadata"),
            String::from("0"),
            String::from("-map_chapters"),
            String::from("0"),
        ]);

        if let Some(tags) = &request.tags {
            args.extend(tags.ffmpeg_args());
        }

        args.push(request.output.to_string_lossy().into_owned());
        args
    }
}

/// Escapes characters that `drawtext` and the filtergraph parser treat as
/// syntax.
fn escape_drawtext(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("'\\''"),
            ':' => escaped.push_str("\\:"),
            '%' => escaped.push_str("\\%"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[async_trait]
impl WatermarkService for Ffmpeg {
    #[instrument(skip(self, request), fields(input = %request.input.display()))]
    async fn apply_watermark(&self, request: &WatermarkRequest) -> Result<()> {
        let args = self.args(request);
        debug!(binary = %self.binary.display(), ?args, "running ffmpeg");

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            // a half-written output is useless; the input is left untouched
            if let Err(e) = tokio::fs::remove_file(&request.output).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        "Could not delete partial output {}: {}",
                        request.output.display(),
                        e
                    );
                }
            }

            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Tool(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}
