//! Playlist detection and expansion.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::error::{AppError, Result};
use crate::format::FormatCatalog;
use crate::services::{FlatEntry, MetadataService};

/// Resolution state of one playlist entry.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryStatus {
    Pending,
    Ready,
    Error(String),
}

/// One video of a resolved URL. `title` and `formats` are filled lazily.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistEntry {
    pub video_url: String,
    pub title: Option<String>,
    pub formats: Option<FormatCatalog>,
    pub status: EntryStatus,
}

impl PlaylistEntry {
    pub fn new(video_url: impl Into<String>) -> Self {
        Self {
            video_url: video_url.into(),
            title: None,
            formats: None,
            status: EntryStatus::Pending,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == EntryStatus::Ready
    }
}

/// What to do with a flat playlist entry that has neither `url` nor
/// `webpage_url`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableEntryPolicy {
    /// Leave it out of the expanded list.
    #[default]
    Drop,
    /// Keep an entry in `Error` status so the caller can show it.
    Placeholder,
}

/// Result of [`PlaylistResolver::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub is_playlist: bool,
    pub video_urls: Vec<String>,
}

/// True for playlist pages, watch URLs carrying a `list` parameter and short
/// links carrying one. Case-insensitive.
///
/// # Examples
///
/// ```
/// use ytmark::playlist::is_playlist;
///
/// assert!(is_playlist("https://www.youtube.com/playlist?list=PL123"));
/// assert!(is_playlist("https://youtu.be/abc123?list=PL123"));
/// assert!(!is_playlist("https://www.youtube.com/watch?v=abc123"));
/// ```
pub fn is_playlist(url: &str) -> bool {
    let url = url.to_ascii_lowercase();

    // playlist page, watch?v=..&list=.., youtu.be/..?list=..
    url.contains("playlist?list=") || url.contains("&list=") || url.contains("?list=")
}

/// Expands playlist URLs through the metadata service's flat mode.
pub struct PlaylistResolver {
    metadata: Arc<dyn MetadataService>,
    policy: UnavailableEntryPolicy,
}

impl PlaylistResolver {
    pub fn new(metadata: Arc<dyn MetadataService>, policy: UnavailableEntryPolicy) -> Self {
        Self { metadata, policy }
    }

    /// Member URLs of a playlist, `url` preferred over `webpage_url`.
    /// Entries with neither are left out.
    ///
    /// # Errors
    /// * `PlaylistExtraction` if the service call fails or returns no entries
    pub async fn expand_playlist(&self, url: &str) -> Result<Vec<String>> {
        let entries = self.flat_entries(url).await?;
        Ok(entries
            .iter()
            .filter_map(|entry| entry.video_url().map(str::to_string))
            .collect())
    }

    /// Playlist members as [`PlaylistEntry`] values in `Pending` status,
    /// with the configured [`UnavailableEntryPolicy`] applied.
    #[instrument(skip(self))]
    pub async fn expand_entries(&self, url: &str) -> Result<Vec<PlaylistEntry>> {
        let flat = self.flat_entries(url).await?;
        let mut entries = Vec::with_capacity(flat.len());

        for (index, item) in flat.into_iter().enumerate() {
            match item.video_url() {
                Some(video_url) => {
                    let mut entry = PlaylistEntry::new(video_url);
                    entry.title = item.title.clone();
                    entries.push(entry);
                }
                None => match self.policy {
                    UnavailableEntryPolicy::Drop => {
                        debug!(index, "dropping playlist entry without url");
                    }
                    UnavailableEntryPolicy::Placeholder => {
                        warn!(index, "playlist entry has no url");
                        let mut entry = PlaylistEntry::new(item.id.clone().unwrap_or_default());
                        entry.title = item.title.clone();
                        entry.status = EntryStatus::Error(format!(
                            "unavailable: playlist entry {} has no url",
                            index + 1
                        ));
                        entries.push(entry);
                    }
                },
            }
        }

        Ok(entries)
    }

    /// Expanded list for playlist URLs, otherwise the URL itself.
    pub async fn resolve(&self, url: &str) -> Result<Resolution> {
        if is_playlist(url) {
            Ok(Resolution {
                is_playlist: true,
                video_urls: self.expand_playlist(url).await?,
            })
        } else {
            Ok(Resolution {
                is_playlist: false,
                video_urls: vec![url.to_string()],
            })
        }
    }

    /// Entry-level [`resolve`](Self::resolve).
    pub async fn resolve_entries(&self, url: &str) -> Result<(bool, Vec<PlaylistEntry>)> {
        if is_playlist(url) {
            Ok((true, self.expand_entries(url).await?))
        } else {
            Ok((false, vec![PlaylistEntry::new(url)]))
        }
    }

    async fn flat_entries(&self, url: &str) -> Result<Vec<FlatEntry>> {
        let playlist = self
            .metadata
            .extract_flat(url)
            .await
            .map_err(|e| AppError::PlaylistExtraction(e.to_string()))?;

        playlist
            .entries
            .ok_or_else(|| AppError::PlaylistExtraction(format!("no entries returned for {}", url)))
    }
}
