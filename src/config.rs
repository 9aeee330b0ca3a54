use serde::Deserialize;
use std::path::PathBuf;

use crate::playlist::UnavailableEntryPolicy;

/// Configuration management for the application.
///
/// Provides centralized configuration options for controlling:
/// - Directory paths
/// - Output container and watermark appearance
/// - Playlist expansion policy

/// Configuration for the downloader application.
///
/// # Examples
///
/// ```
/// use ytmark::Config;
///
/// let config = Config::default();
/// assert_eq!(config.container, "mp4");
/// assert!(config.watermark_text.is_none());
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub output_dir: PathBuf,
    pub input_dir: PathBuf,
    pub libraries_dir: PathBuf,
    /// Container the streams are muxed into, also the output file extension.
    pub container: String,
    /// Watermark applied by unattended runs; `None` disables watermarking.
    pub watermark_text: Option<String>,
    pub watermark: WatermarkStyle,
    pub unavailable_entries: UnavailableEntryPolicy,
    /// File name of the failure report written into a batch directory.
    pub failure_report: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            input_dir: PathBuf::from("input"),
            libraries_dir: PathBuf::from("libs"),
            container: String::from("mp4"),
            watermark_text: None,
            watermark: WatermarkStyle::default(),
            unavailable_entries: UnavailableEntryPolicy::default(),
            failure_report: String::from("failed.txt"),
        }
    }
}

/// Visual and rate-control parameters of the moving text watermark.
///
/// The overlay position is `x = mod(t * x_speed, w)`, `y = mod(t * y_speed, h)`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatermarkStyle {
    pub font: String,
    pub font_color: String,
    pub font_size: u32,
    pub x_speed: f64,
    pub y_speed: f64,
    /// Constant quality used when the source video bitrate is unknown.
    pub crf: u32,
    /// Keyframe interval in frames.
    pub gop: u32,
    pub bufsize: String,
    /// `-maxrate` used together with `crf`.
    pub fallback_maxrate: String,
}

impl Default for WatermarkStyle {
    fn default() -> Self {
        Self {
            font: String::from("Verdana"),
            font_color: String::from("white"),
            font_size: 24,
            x_speed: 0.5,
            y_speed: 0.2,
            crf: 22,
            gop: 60,
            bufsize: String::from("10M"),
            fallback_maxrate: String::from("1M"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: Config = serde_json::from_str(
            r#"{
                "output_dir": "videos",
                "watermark_text": "sample",
                "unavailable_entries": "placeholder",
                "watermark": { "font_size": 32 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.output_dir, PathBuf::from("videos"));
        assert_eq!(config.input_dir, PathBuf::from("input"));
        assert_eq!(config.watermark_text.as_deref(), Some("sample"));
        assert_eq!(config.unavailable_entries, UnavailableEntryPolicy::Placeholder);
        assert_eq!(config.watermark.font_size, 32);
        assert_eq!(config.watermark.font, "Verdana");
        assert_eq!(config.failure_report, "failed.txt");
    }
}
