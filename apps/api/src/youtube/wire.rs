//! Response shapes of the YouTube Data API v3, limited to the fields we read.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{CatalogError, PlaylistPage, VideoRecord};

#[derive(Debug, Deserialize)]
pub(super) struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
pub(super) struct ApiErrorBody {
    pub message: String,
}

// ── channels.list ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(super) struct ChannelListResponse {
    #[serde(default)]
    items: Vec<ChannelItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelItem {
    content_details: Option<ChannelContentDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContentDetails {
    related_playlists: RelatedPlaylists,
}

#[derive(Debug, Deserialize)]
struct RelatedPlaylists {
    uploads: Option<String>,
}

impl ChannelListResponse {
    pub fn uploads_playlist(self) -> Option<String> {
        self.items
            .into_iter()
            .next()
            .and_then(|c| c.content_details)
            .and_then(|d| d.related_playlists.uploads)
    }
}

// ── playlistItems.list ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PlaylistItemListResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    content_details: Option<PlaylistItemContentDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemContentDetails {
    video_id: String,
}

impl PlaylistItemListResponse {
    pub fn into_page(self) -> PlaylistPage {
        PlaylistPage {
            video_ids: self
                .items
                .into_iter()
                .filter_map(|i| i.content_details.map(|d| d.video_id))
                .filter(|id| !id.is_empty())
                .collect(),
            next_page_token: self.next_page_token.filter(|t| !t.is_empty()),
        }
    }
}

// ── videos.list ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(super) struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    #[serde(default)]
    id: String,
    snippet: Option<VideoSnippet>,
    statistics: Option<VideoStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    published_at: String,
    #[serde(default)]
    title: String,
    description: Option<String>,
}

/// Counts arrive as decimal strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoStatistics {
    view_count: Option<String>,
}

impl VideoListResponse {
    pub fn into_records(self) -> Result<Vec<VideoRecord>, CatalogError> {
        let mut records = Vec::with_capacity(self.items.len());
        for item in self.items {
            if item.id.is_empty() {
                continue;
            }
            let Some(snippet) = item.snippet else {
                debug!(video_id = %item.id, "Video without snippet, skipping");
                continue;
            };

            let published_at = DateTime::parse_from_rfc3339(&snippet.published_at)
                .map_err(|e| {
                    CatalogError::Decode(format!(
                        "video {} publishedAt '{}': {e}",
                        item.id, snippet.published_at
                    ))
                })?
                .with_timezone(&Utc);

            let view_count = match item.statistics {
                None => None,
                Some(VideoStatistics { view_count: None }) => Some(0),
                Some(VideoStatistics {
                    view_count: Some(raw),
                }) => Some(raw.parse::<u64>().map_err(|e| {
                    CatalogError::Decode(format!("video {} viewCount '{raw}': {e}", item.id))
                })?),
            };

            records.push(VideoRecord {
                id: item.id,
                title: snippet.title,
                description: snippet.description,
                published_at,
                view_count,
            });
        }
        Ok(records)
    }
}
