//! Aggregation pipeline: channel → uploads listing → paged detail lookups →
//! keyword/date filtering → pinned merge → cache.
//!
//! Single-threaded per request. Concurrent requests for the same key may both
//! miss the cache and both hit the catalog; nothing deduplicates them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveDate, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{Cache, CacheError};
use crate::models::video::VideoInfo;
use crate::youtube::{Catalog, CatalogError, VideoRecord, MAX_PAGE_SIZE};

/// Lifetime of a cached aggregation result.
pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDateFormat(String),

    #[error("channel '{0}' not found")]
    ChannelNotFound(String),

    #[error("catalog call failed: {0}")]
    RemoteCallFailed(#[from] CatalogError),

    #[error("failed to encode result: {0}")]
    Encode(#[source] CacheError),
}

/// Inputs to one aggregation.
#[derive(Debug, Clone, Default)]
pub struct VideoQuery {
    pub channel_id: String,
    pub keyword: String,
    /// `YYYY-MM-DD`.
    pub start_date: String,
    /// `YYYY-MM-DD`; `None` means "now".
    pub end_date: Option<String>,
    /// Always considered regardless of the date window, in this order.
    pub pinned_ids: Vec<String>,
    /// Caps pagination at `ceil(max_results / 50)` pages and becomes part of
    /// the cache key.
    pub max_results: Option<u32>,
}

impl VideoQuery {
    /// Deterministic cache key for this query. Pinned ids are not part of it.
    pub fn cache_key(&self) -> String {
        let mut key = format!(
            "videos:{}:{}:{}_{}",
            self.channel_id,
            self.keyword,
            self.start_date,
            self.end_date.as_deref().unwrap_or("")
        );
        if let Some(max) = self.max_results {
            key.push_str(&format!(":{max}"));
        }
        key
    }

    fn page_limit(&self) -> Option<usize> {
        self.max_results
            .map(|max| (max as usize).div_ceil(MAX_PAGE_SIZE).max(1))
    }
}

/// Publish-time window. `start` is inclusive, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DateWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl DateWindow {
    /// Both bounds are whole days: an explicit end date includes that entire
    /// day; a missing one means "now".
    fn parse(start: &str, end: Option<&str>, now: DateTime<Utc>) -> Result<Self, StatsError> {
        let start = parse_date(start)?;
        let end = match end {
            Some(raw) => parse_date(raw)?
                .checked_add_days(Days::new(1))
                .ok_or_else(|| StatsError::InvalidDateFormat(raw.to_string()))?,
            None => now,
        };
        Ok(Self { start, end })
    }
}

fn parse_date(raw: &str) -> Result<DateTime<Utc>, StatsError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| StatsError::InvalidDateFormat(raw.to_string()))
}

/// What to do with one detail record while walking a page.
#[derive(Debug, PartialEq, Eq)]
enum Verdict {
    Keep(VideoInfo),
    Skip,
    /// Older than the window; nothing after it can be in range.
    Stop,
}

fn matches_keyword(record: &VideoRecord, keyword: &str) -> Option<VideoInfo> {
    let description = record.description.as_deref()?;
    let views = record.view_count?;
    description.contains(keyword).then(|| {
        VideoInfo::new(&record.id, record.title.clone(), record.published_at, views)
    })
}

fn judge(record: &VideoRecord, window: &DateWindow, keyword: &str) -> Verdict {
    if record.published_at < window.start {
        return Verdict::Stop;
    }
    if record.published_at >= window.end {
        return Verdict::Skip;
    }
    matches_keyword(record, keyword).map_or(Verdict::Skip, Verdict::Keep)
}

/// Owns the catalog and cache handles for all aggregation requests.
#[derive(Clone)]
pub struct VideoStats {
    catalog: Arc<dyn Catalog>,
    cache: Cache,
}

impl VideoStats {
    pub fn new(catalog: Arc<dyn Catalog>, cache: Cache) -> Self {
        Self { catalog, cache }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Returns the newest-first, keyword-filtered videos for `query`, with
    /// pinned matches ranked above everything else.
    pub async fn get_videos(&self, query: &VideoQuery) -> Result<Vec<VideoInfo>, StatsError> {
        let key = query.cache_key();
        match self.cache.get::<Vec<VideoInfo>>(&key).await {
            Ok(videos) => {
                debug!(cache_key = %key, count = videos.len(), "Returning videos from cache");
                return Ok(videos);
            }
            Err(CacheError::NotFound) => debug!(cache_key = %key, "Cache miss"),
            Err(e) => warn!(cache_key = %key, error = %e, "Cache read failed, fetching from catalog"),
        }

        let window = DateWindow::parse(&query.start_date, query.end_date.as_deref(), Utc::now())?;

        let playlist = self
            .catalog
            .uploads_playlist(&query.channel_id)
            .await?
            .ok_or_else(|| StatsError::ChannelNotFound(query.channel_id.clone()))?;

        let windowed = self.collect_uploads(&playlist, &window, query).await?;
        let mut videos = self.collect_pinned(query).await?;
        videos.extend(windowed);

        let payload = Cache::encode(&videos).map_err(StatsError::Encode)?;
        self.cache.set_encoded(&key, payload, CACHE_TTL).await;

        info!(
            channel_id = %query.channel_id,
            count = videos.len(),
            "Aggregated channel videos"
        );
        Ok(videos)
    }

    /// Walks the uploads listing page by page until it runs out, a page is
    /// empty, the page cap is reached, or a record predates the window.
    async fn collect_uploads(
        &self,
        playlist_id: &str,
        window: &DateWindow,
        query: &VideoQuery,
    ) -> Result<Vec<VideoInfo>, StatsError> {
        let page_limit = query.page_limit();
        let mut videos = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self
                .catalog
                .playlist_page(playlist_id, page_token.as_deref())
                .await?;
            pages += 1;

            if page.video_ids.is_empty() {
                debug!(playlist_id, pages, "Empty listing page, stopping");
                break;
            }

            let mut early_stop = false;
            for ids in page.video_ids.chunks(MAX_PAGE_SIZE) {
                let records = self.catalog.videos(ids).await?;
                for record in &records {
                    match judge(record, window, &query.keyword) {
                        Verdict::Keep(info) => videos.push(info),
                        Verdict::Skip => {}
                        Verdict::Stop => {
                            early_stop = true;
                            break;
                        }
                    }
                }
                if early_stop {
                    break;
                }
            }

            if early_stop {
                debug!(playlist_id, pages, "Reached videos older than start date, stopping");
                break;
            }
            if page_limit.is_some_and(|limit| pages >= limit) {
                debug!(playlist_id, pages, "Page limit reached");
                break;
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(videos)
    }

    /// Pinned ids bypass the date window but not the keyword filter.
    async fn collect_pinned(&self, query: &VideoQuery) -> Result<Vec<VideoInfo>, StatsError> {
        let ids: Vec<String> = query
            .pinned_ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();

        let mut pinned = Vec::new();
        for batch in ids.chunks(MAX_PAGE_SIZE) {
            let records = self.catalog.videos(batch).await?;
            pinned.extend(
                records
                    .iter()
                    .filter_map(|r| matches_keyword(r, &query.keyword)),
            );
        }
        debug!(requested = ids.len(), matched = pinned.len(), "Merged pinned videos");
        Ok(pinned)
    }
}
