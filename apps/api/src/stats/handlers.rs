//! Axum route handlers for the Stats and Cache APIs.

use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::cache::PartialScan;
use crate::errors::AppError;
use crate::state::AppState;
use crate::stats::render::{content_hash, render_csv};
use crate::stats::VideoQuery;

const DEFAULT_CACHE_PATTERN: &str = "videos:*";

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct StatsParams {
    #[serde(default)]
    pub channel_id: String,
    #[serde(default, alias = "ad_word")]
    pub keyword: String,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: Option<String>,
    /// Comma-separated video ids.
    #[serde(default, alias = "hidden_videos")]
    pub pinned: Option<String>,
    #[serde(default)]
    pub max_results: Option<u32>,
}

impl StatsParams {
    pub fn into_query(self) -> VideoQuery {
        VideoQuery {
            channel_id: self.channel_id,
            keyword: self.keyword,
            start_date: self.start_date,
            end_date: self.end_date.filter(|d| !d.trim().is_empty()),
            pinned_ids: self
                .pinned
                .as_deref()
                .unwrap_or("")
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect(),
            max_results: self.max_results,
        }
    }

    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("channel_id", self.channel_id.clone()),
            ("keyword", self.keyword.clone()),
            ("start_date", self.start_date.clone()),
            ("end_date", self.end_date.clone().unwrap_or_default()),
        ];
        if let Some(pinned) = &self.pinned {
            pairs.push(("pinned", pinned.clone()));
        }
        if let Some(max) = self.max_results {
            pairs.push(("max_results", max.to_string()));
        }
        pairs
    }
}

#[derive(Debug, Deserialize)]
pub struct PatternParams {
    pub pattern: Option<String>,
}

impl PatternParams {
    fn pattern(&self) -> &str {
        self.pattern
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_CACHE_PATTERN)
    }
}

#[derive(Debug, Serialize)]
pub struct CacheEntriesResponse {
    pub entries: HashMap<String, Value>,
    pub complete: bool,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CacheDeleteResponse {
    pub deleted: u64,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// GET /v1/stats/get
///
/// Aggregates the channel's matching videos and returns them as a CSV download.
pub async fn handle_get_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Result<impl IntoResponse, AppError> {
    if params.channel_id.trim().is_empty() {
        return Err(AppError::Validation("channel_id cannot be empty".to_string()));
    }
    if params.start_date.trim().is_empty() {
        return Err(AppError::Validation("start_date cannot be empty".to_string()));
    }

    let videos = state.stats.get_videos(&params.into_query()).await?;
    let etag = content_hash(&videos).map_err(|e| AppError::Internal(e.into()))?;
    let body = render_csv(&videos);

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=stats.csv".to_string(),
            ),
            (header::ETAG, format!("\"{etag}\"")),
        ],
        Bytes::from(body),
    ))
}

/// GET /v1/stats/command
///
/// Returns a spreadsheet formula that imports the CSV for the same parameters.
pub async fn handle_get_command(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Result<String, AppError> {
    import_formula(&state.config.external_host, state.config.port, &params)
}

fn import_formula(host: &str, port: u16, params: &StatsParams) -> Result<String, AppError> {
    let base = format!("http://{host}:{port}/v1/stats/get");
    let url = Url::parse_with_params(&base, params.query_pairs())
        .map_err(|e| AppError::Validation(format!("invalid external host: {e}")))?;
    Ok(format!("=IMPORTDATA(\"{url}\";\",\";\"en_US\")"))
}

/// GET /v1/cache/entries
///
/// Dumps every cached value matching `pattern`. A scan that hits its deadline
/// still returns what it collected, flagged `complete: false`.
pub async fn handle_cache_entries(
    State(state): State<AppState>,
    Query(params): Query<PatternParams>,
) -> Json<CacheEntriesResponse> {
    let response = match state.stats.cache().get_all::<Value>(params.pattern()).await {
        Ok(entries) => CacheEntriesResponse {
            entries,
            complete: true,
            error: None,
        },
        Err(PartialScan { error, entries }) => CacheEntriesResponse {
            entries,
            complete: false,
            error: Some(error.to_string()),
        },
    };
    debug!(
        pattern = params.pattern(),
        entries = response.entries.len(),
        complete = response.complete,
        "Listed cache entries"
    );
    Json(response)
}

/// DELETE /v1/cache
///
/// Removes every cached value matching `pattern` (or the literal key).
pub async fn handle_cache_delete(
    State(state): State<AppState>,
    Query(params): Query<PatternParams>,
) -> Result<Json<CacheDeleteResponse>, AppError> {
    let deleted = state.stats.cache().delete(&[params.pattern()]).await?;
    Ok(Json(CacheDeleteResponse { deleted }))
}
