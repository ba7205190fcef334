mod cache;
mod config;
mod errors;
mod models;
mod routes;
mod state;
mod stats;
mod youtube;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cache::{store::RedisStore, Cache};
use crate::config::Config;
use crate::routes::build_router;
use crate::state::AppState;
use crate::stats::VideoStats;
use crate::youtube::YouTubeClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ytstats v{}", env!("CARGO_PKG_VERSION"));

    // Initialize Redis
    let store = RedisStore::connect(&config.redis_url).await?;
    let cache = Cache::new(Arc::new(store));

    // Initialize YouTube client
    let youtube = YouTubeClient::new(&config.youtube_api_url, config.youtube_api_key.clone())?;
    info!("YouTube client initialized ({})", config.youtube_api_url);

    let state = AppState {
        stats: VideoStats::new(Arc::new(youtube), cache),
        config: config.clone(),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
