use crate::error::{AppError, Result};
use crate::format::{CodecFamily, FormatCatalog, FormatDescriptor};

/// Format selection over a [`FormatCatalog`].
///
/// Every function here is pure: no I/O, deterministic for a given catalog,
/// and ties always resolve to the earliest element in catalog order.

/// The formats chosen for one video.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionResult {
    pub best_audio: FormatDescriptor,
    pub best_video: FormatDescriptor,
    /// Video-only formats equivalent to `best_video`, in catalog order.
    pub candidates: Vec<FormatDescriptor>,
}

/// A video/audio format pair to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatChoice {
    pub video_format_id: String,
    pub audio_format_id: String,
}

impl SelectionResult {
    /// The best video paired with the best audio.
    pub fn choice(&self) -> FormatChoice {
        self.choice_for(&self.best_video)
    }

    /// A user-picked video format paired with the best audio.
    pub fn choice_for(&self, video: &FormatDescriptor) -> FormatChoice {
        FormatChoice {
            video_format_id: video.format_id.clone(),
            audio_format_id: self.best_audio.format_id.clone(),
        }
    }
}

/// Runs the three selectors on one catalog.
pub fn select(catalog: &FormatCatalog) -> Result<SelectionResult> {
    let best_audio = select_best_audio(catalog)?.clone();
    let best_video = select_best_video(catalog)?.clone();
    let candidates = select_matching_candidates(catalog, &best_video)
        .into_iter()
        .cloned()
        .collect();

    Ok(SelectionResult {
        best_audio,
        best_video,
        candidates,
    })
}

/// Audio-only format with the highest average bitrate.
///
/// # Errors
/// * `NoAudioAvailable` if the catalog has no audio-only format
pub fn select_best_audio(catalog: &FormatCatalog) -> Result<&FormatDescriptor> {
    let mut best: Option<&FormatDescriptor> = None;

    for format in catalog.iter().filter(|f| f.is_audio_only()) {
        match best {
            Some(current) if format.average_audio_bitrate <= current.average_audio_bitrate => {}
            _ => best = Some(format),
        }
    }

    best.ok_or(AppError::NoAudioAvailable)
}

/// Best video-only format: highest height, then highest fps, then VP9 over
/// AVC. When neither family is present the codec stage keeps every format.
///
/// # Errors
/// * `NoVideoAvailable` if the catalog has no video-only format
pub fn select_best_video(catalog: &FormatCatalog) -> Result<&FormatDescriptor> {
    let videos: Vec<&FormatDescriptor> = catalog.iter().filter(|f| f.is_video_only()).collect();
    if videos.is_empty() {
        return Err(AppError::NoVideoAvailable);
    }

    let max_height = videos.iter().map(|f| f.height).max().unwrap_or(0);
    let tallest: Vec<&FormatDescriptor> = videos
        .into_iter()
        .filter(|f| f.height == max_height)
        .collect();

    let max_fps = tallest.iter().map(|f| f.fps).fold(0.0_f64, f64::max);
    let fastest: Vec<&FormatDescriptor> = tallest.into_iter().filter(|f| f.fps == max_fps).collect();

    let preferred = if fastest
        .iter()
        .any(|f| f.codec_family() == Some(CodecFamily::Vp9))
    {
        CodecFamily::Vp9
    } else {
        CodecFamily::Avc
    };

    fastest
        .iter()
        .find(|f| f.codec_family() == Some(preferred))
        .or_else(|| fastest.first())
        .copied()
        .ok_or(AppError::NoVideoAvailable)
}

/// Video-only formats with the same fps and codec family as `best_video` and
/// a known file size. An empty result means there is nothing to offer, it is
/// not an error.
pub fn select_matching_candidates<'a>(
    catalog: &'a FormatCatalog,
    best_video: &FormatDescriptor,
) -> Vec<&'a FormatDescriptor> {
    let family = best_video.codec_family();

    catalog
        .iter()
        .filter(|f| f.is_video_only())
        .filter(|f| f.fps == best_video.fps)
        .filter(|f| f.codec_family() == family)
        .filter(|f| f.file_size.is_some())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::NO_CODEC;

    fn video(id: &str, height: u32, fps: f64, vcodec: &str, size: Option<u64>) -> FormatDescriptor {
        FormatDescriptor {
            format_id: id.to_string(),
            video_codec: vcodec.to_string(),
            audio_codec: NO_CODEC.to_string(),
            height,
            fps,
            average_audio_bitrate: 0.0,
            total_bitrate: 2500.0,
            file_size: size,
            file_size_approx: None,
            format_note: format!("{}p", height),
            extension: "mp4".to_string(),
        }
    }

    fn audio(id: &str, abr: f64) -> FormatDescriptor {
        FormatDescriptor {
            format_id: id.to_string(),
            video_codec: NO_CODEC.to_string(),
            audio_codec: "mp4a.40.2".to_string(),
            height: 0,
            fps: 0.0,
            average_audio_bitrate: abr,
            total_bitrate: abr,
            file_size: Some(1_000_000),
            file_size_approx: None,
            format_note: "medium".to_string(),
            extension: "m4a".to_string(),
        }
    }

    fn muxed(id: &str) -> FormatDescriptor {
        FormatDescriptor {
            audio_codec: "mp4a.40.2".to_string(),
            average_audio_bitrate: 500.0,
            ..video(id, 2160, 60.0, "avc1.640033", Some(1))
        }
    }

    #[test]
    fn test_best_audio_highest_bitrate() {
        let catalog = FormatCatalog::new(vec![audio("a1", 128.0), audio("a2", 160.0)]);
        assert_eq!(select_best_audio(&catalog).unwrap().format_id, "a2");
    }

    #[test]
    fn test_best_audio_first_of_ties_and_ignores_muxed() {
        let catalog = FormatCatalog::new(vec![
            muxed("22"),
            audio("a1", 160.0),
            video("v1", 720, 30.0, "avc1", None),
            audio("a2", 160.0),
        ]);
        assert_eq!(select_best_audio(&catalog).unwrap().format_id, "a1");
    }

    #[test]
    fn test_best_audio_empty() {
        let catalog = FormatCatalog::new(vec![video("v1", 720, 30.0, "avc1", None), muxed("22")]);
        assert!(matches!(
            select_best_audio(&catalog),
            Err(AppError::NoAudioAvailable)
        ));
    }

    #[test]
    fn test_best_video_height_then_fps() {
        let catalog = FormatCatalog::new(vec![
            video("v1", 1080, 30.0, "avc1.64", None),
            video("v2", 1080, 60.0, "avc1.64", None),
            video("v3", 720, 60.0, "vp9", None),
        ]);
        assert_eq!(select_best_video(&catalog).unwrap().format_id, "v2");
    }

    #[test]
    fn test_best_video_prefers_vp9() {
        let catalog = FormatCatalog::new(vec![
            video("137", 1080, 30.0, "avc1.640028", None),
            video("248", 1080, 30.0, "vp9", None),
            video("399", 1080, 30.0, "av01.0.08M.08", None),
        ]);
        assert_eq!(select_best_video(&catalog).unwrap().format_id, "248");
    }

    #[test]
    fn test_best_video_avc_over_other() {
        let catalog = FormatCatalog::new(vec![
            video("399", 1080, 30.0, "av01.0.08M.08", None),
            video("137", 1080, 30.0, "avc1.640028", None),
        ]);
        assert_eq!(select_best_video(&catalog).unwrap().format_id, "137");
    }

    #[test]
    fn test_best_video_falls_back_when_no_known_family() {
        let catalog = FormatCatalog::new(vec![
            video("394", 240, 30.0, "av01.0.00M.08", None),
            video("399", 1080, 30.0, "av01.0.08M.08", None),
            video("400", 1080, 30.0, "av01.0.12M.08", None),
        ]);
        assert_eq!(select_best_video(&catalog).unwrap().format_id, "399");
    }

    #[test]
    fn test_best_video_missing_height_and_fps_are_zero() {
        let catalog = FormatCatalog::new(vec![
            video("x1", 0, 0.0, "avc1", None),
            video("x2", 0, 0.0, "vp09.00.10.08", None),
        ]);
        assert_eq!(select_best_video(&catalog).unwrap().format_id, "x2");
    }

    #[test]
    fn test_best_video_empty() {
        let catalog = FormatCatalog::new(vec![audio("a1", 128.0), muxed("22")]);
        assert!(matches!(
            select_best_video(&catalog),
            Err(AppError::NoVideoAvailable)
        ));
    }

    #[test]
    fn test_candidates_same_family_fps_and_known_size() {
        let catalog = FormatCatalog::new(vec![
            video("303", 1080, 60.0, "vp09.00.41.08", Some(90)),
            video("302", 720, 60.0, "vp9", Some(50)),
            video("248", 1080, 30.0, "vp9", Some(70)),
            video("299", 1080, 60.0, "avc1.64002a", Some(100)),
            video("247", 720, 60.0, "vp9", None),
            audio("251", 160.0),
        ]);
        let best = select_best_video(&catalog).unwrap().clone();
        assert_eq!(best.format_id, "303");

        let ids: Vec<&str> = select_matching_candidates(&catalog, &best)
            .iter()
            .map(|f| f.format_id.as_str())
            .collect();
        assert_eq!(ids, vec!["303", "302"]);

        let again: Vec<&str> = select_matching_candidates(&catalog, &best)
            .iter()
            .map(|f| f.format_id.as_str())
            .collect();
        assert_eq!(ids, again);
    }

    #[test]
    fn test_candidates_may_be_empty() {
        let catalog = FormatCatalog::new(vec![
            video("137", 1080, 30.0, "avc1.640028", None),
            audio("140", 128.0),
        ]);
        let best = select_best_video(&catalog).unwrap().clone();
        assert!(select_matching_candidates(&catalog, &best).is_empty());

        let selection = select(&catalog).unwrap();
        assert!(selection.candidates.is_empty());
        assert_eq!(
            selection.choice(),
            FormatChoice {
                video_format_id: "137".into(),
                audio_format_id: "140".into(),
            }
        );
    }
}
