use crate::config::Config;
use crate::stats::VideoStats;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Aggregation pipeline; owns the catalog client and the cache.
    pub stats: VideoStats,
    pub config: Config,
}
