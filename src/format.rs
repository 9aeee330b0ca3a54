//! Normalized format records and the codec-family predicate shared by the
//! selector and the watermark encoder choice.

use serde::Deserialize;
use std::fmt;

/// Marker used by yt-dlp for an absent audio or video track.
pub const NO_CODEC: &str = "none";

/// Codec family used as an equivalence class for video streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecFamily {
    /// `vp9` / `vp09.*`
    Vp9,
    /// `avc1.*` (H.264)
    Avc,
}

impl CodecFamily {
    /// Classifies a codec string. VP9 is matched as a case-insensitive prefix,
    /// AVC as a case-insensitive substring; anything else has no family.
    pub fn of(codec: &str) -> Option<CodecFamily> {
        let codec = codec.to_ascii_lowercase();
        if codec.starts_with("vp9") || codec.starts_with("vp09") {
            Some(CodecFamily::Vp9)
        } else if codec.contains("avc1") {
            Some(CodecFamily::Avc)
        } else {
            None
        }
    }

    /// Re-encode target for a source codec: VP9 stays VP9, everything else
    /// goes to H.264.
    pub fn encode_target(codec: &str) -> CodecFamily {
        match Self::of(codec) {
            Some(CodecFamily::Vp9) => CodecFamily::Vp9,
            _ => CodecFamily::Avc,
        }
    }
}

impl fmt::Display for CodecFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vp9 => write!(f, "VP9"),
            Self::Avc => write!(f, "H.264"),
        }
    }
}

/// One candidate stream of a video.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatDescriptor {
    pub format_id: String,
    pub video_codec: String,
    pub audio_codec: String,
    pub height: u32,
    pub fps: f64,
    /// kbps
    pub average_audio_bitrate: f64,
    /// kbps
    pub total_bitrate: f64,
    pub file_size: Option<u64>,
    /// Estimated size, for display only.
    pub file_size_approx: Option<u64>,
    pub format_note: String,
    pub extension: String,
}

impl FormatDescriptor {
    pub fn is_video_only(&self) -> bool {
        self.audio_codec == NO_CODEC && self.video_codec != NO_CODEC
    }

    pub fn is_audio_only(&self) -> bool {
        self.video_codec == NO_CODEC && self.audio_codec != NO_CODEC
    }

    pub fn codec_family(&self) -> Option<CodecFamily> {
        CodecFamily::of(&self.video_codec)
    }

    /// Display string for a format picker, e.g.
    /// `1080p60 · avc1.640028 · 120.4 MiB (ID: 299)`.
    pub fn label(&self) -> String {
        let mut parts = Vec::new();

        if self.is_audio_only() {
            parts.push(format!("audio {:.0}k", self.average_audio_bitrate));
            parts.push(self.audio_codec.clone());
        } else {
            let fps = if self.fps > 0.0 {
                format!("{}", self.fps.round() as u64)
            } else {
                String::new()
            };
            parts.push(format!("{}p{}", self.height, fps));
            parts.push(self.video_codec.clone());
        }

        match (self.file_size, self.file_size_approx) {
            (Some(size), _) => parts.push(format_size(size)),
            (None, Some(size)) => parts.push(format!("~{}", format_size(size))),
            (None, None) => parts.push(String::from("size unknown")),
        }

        format!("{} (ID: {})", parts.join(" · "), self.format_id)
    }
}

fn format_size(bytes: u64) -> String {
    let mib = bytes as f64 / 1_048_576.0;
    if mib >= 1024.0 {
        format!("{:.1} GiB", mib / 1024.0)
    } else {
        format!("{:.1} MiB", mib)
    }
}

/// A format record as printed by `yt-dlp --dump-single-json`.
///
/// Every field may be absent or `null`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
    #[serde(default)]
    pub format_id: Option<String>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub fps: Option<f64>,
    #[serde(default)]
    pub abr: Option<f64>,
    #[serde(default)]
    pub tbr: Option<f64>,
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub filesize_approx: Option<u64>,
    #[serde(default)]
    pub format_note: Option<String>,
    #[serde(default)]
    pub ext: Option<String>,
}

impl From<RawFormat> for FormatDescriptor {
    fn from(raw: RawFormat) -> Self {
        Self {
            format_id: raw.format_id.unwrap_or_default(),
            video_codec: raw.vcodec.unwrap_or_else(|| NO_CODEC.to_string()),
            audio_codec: raw.acodec.unwrap_or_else(|| NO_CODEC.to_string()),
            height: raw.height.unwrap_or(0),
            fps: raw.fps.unwrap_or(0.0).max(0.0),
            average_audio_bitrate: raw.abr.unwrap_or(0.0).max(0.0),
            total_bitrate: raw.tbr.unwrap_or(0.0).max(0.0),
            file_size: raw.filesize,
            file_size_approx: raw.filesize_approx,
            format_note: raw.format_note.unwrap_or_default(),
            extension: raw.ext.unwrap_or_default(),
        }
    }
}

/// Ordered formats of one source video. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormatCatalog {
    formats: Vec<FormatDescriptor>,
}

impl FormatCatalog {
    pub fn new(formats: Vec<FormatDescriptor>) -> Self {
        Self { formats }
    }

    /// Normalizes raw records, dropping those without a `format_id`.
    pub fn from_raw(raw: Vec<RawFormat>) -> Self {
        let formats = raw
            .into_iter()
            .filter(|f| f.format_id.as_deref().is_some_and(|id| !id.is_empty()))
            .map(FormatDescriptor::from)
            .collect();
        Self { formats }
    }

    pub fn formats(&self) -> &[FormatDescriptor] {
        &self.formats
    }

    pub fn iter(&self) -> impl Iterator<Item = &FormatDescriptor> {
        self.formats.iter()
    }

    pub fn find(&self, format_id: &str) -> Option<&FormatDescriptor> {
        self.formats.iter().find(|f| f.format_id == format_id)
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }
}
