use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const WATCH_URL: &str = "https://www.youtube.com/watch?v=";
const PUBLISHED_FORMAT: &str = "%Y-%m-%d %H:%M";

/// One row of an aggregation result. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub title: String,
    /// `YYYY-MM-DD HH:MM` in UTC.
    pub published_at: String,
    pub view_count: u64,
    pub url: String,
}

impl VideoInfo {
    pub fn new(
        video_id: &str,
        title: impl Into<String>,
        published_at: DateTime<Utc>,
        view_count: u64,
    ) -> Self {
        Self {
            title: title.into(),
            published_at: published_at.format(PUBLISHED_FORMAT).to_string(),
            view_count,
            url: watch_url(video_id),
        }
    }
}

pub fn watch_url(video_id: &str) -> String {
    format!("{WATCH_URL}{video_id}")
}

/// Unsigned sum of views across a result set.
pub fn total_views(videos: &[VideoInfo]) -> u64 {
    videos.iter().map(|v| v.view_count).sum()
}
