/// YouTube Data API client: the single point of entry for catalog calls.
///
/// The aggregation pipeline only sees the `Catalog` trait; `YouTubeClient`
/// is the production implementation. Calls are never retried.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

mod wire;

use self::wire::{ApiErrorEnvelope, ChannelListResponse, PlaylistItemListResponse, VideoListResponse};

/// Upper bound on ids per batched lookup and items per listing page.
pub const MAX_PAGE_SIZE: usize = 50;
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("catalog request timed out")]
    Timeout,

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("unexpected catalog payload: {0}")]
    Decode(String),
}

/// One page of an uploads listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaylistPage {
    pub video_ids: Vec<String>,
    pub next_page_token: Option<String>,
}

/// Detail record for a single video. `description` and `view_count` are
/// absent when the catalog omitted the snippet description or the
/// statistics block.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoRecord {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub published_at: DateTime<Utc>,
    pub view_count: Option<u64>,
}

/// The channel → uploads playlist → items → details shape of the catalog.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Resolves a channel to its uploads playlist id; `None` if the channel
    /// does not exist.
    async fn uploads_playlist(&self, channel_id: &str) -> Result<Option<String>, CatalogError>;

    /// Fetches one page (≤ 50 items) of a playlist, newest first.
    async fn playlist_page(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
    ) -> Result<PlaylistPage, CatalogError>;

    /// Batched detail lookup for up to 50 ids.
    async fn videos(&self, ids: &[String]) -> Result<Vec<VideoRecord>, CatalogError>;
}

#[derive(Clone)]
pub struct YouTubeClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl YouTubeClient {
    pub fn new(base_url: impl Into<String>, api_key: String) -> Result<Self, CatalogError> {
        Ok(Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        resource: &str,
        params: &[(&str, &str)],
    ) -> Result<T, CatalogError> {
        let url = format!("{}/{resource}", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(params)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(CatalogError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response.json::<T>().await.map_err(classify)
    }
}

fn classify(e: reqwest::Error) -> CatalogError {
    if e.is_timeout() {
        CatalogError::Timeout
    } else {
        CatalogError::Http(e)
    }
}

#[async_trait]
impl Catalog for YouTubeClient {
    async fn uploads_playlist(&self, channel_id: &str) -> Result<Option<String>, CatalogError> {
        let response: ChannelListResponse = self
            .fetch("channels", &[("part", "contentDetails"), ("id", channel_id)])
            .await?;
        Ok(response.uploads_playlist())
    }

    async fn playlist_page(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
    ) -> Result<PlaylistPage, CatalogError> {
        let max_results = MAX_PAGE_SIZE.to_string();
        let mut params = vec![
            ("part", "contentDetails"),
            ("playlistId", playlist_id),
            ("maxResults", max_results.as_str()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let response: PlaylistItemListResponse = self.fetch("playlistItems", &params).await?;
        let page = response.into_page();
        debug!(
            playlist_id,
            items = page.video_ids.len(),
            has_next = page.next_page_token.is_some(),
            "Fetched playlist page"
        );
        Ok(page)
    }

    async fn videos(&self, ids: &[String]) -> Result<Vec<VideoRecord>, CatalogError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let joined = ids.join(",");
        let response: VideoListResponse = self
            .fetch("videos", &[("part", "snippet,statistics"), ("id", joined.as_str())])
            .await?;
        response.into_records()
    }
}
