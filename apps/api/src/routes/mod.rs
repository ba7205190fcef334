pub mod health;

use axum::{
    routing::{delete, get},
    Router,
};

use crate::state::AppState;
use crate::stats::handlers;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Stats API
        .route("/v1/stats/get", get(handlers::handle_get_stats))
        .route("/v1/stats/command", get(handlers::handle_get_command))
        // Cache API
        .route("/v1/cache/entries", get(handlers::handle_cache_entries))
        .route("/v1/cache", delete(handlers::handle_cache_delete))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::cache::{store::MemoryStore, Cache};
    use crate::config::Config;
    use crate::stats::VideoStats;
    use crate::youtube::{Catalog, CatalogError, PlaylistPage, VideoRecord};

    /// Catalog with one channel and no uploads.
    struct EmptyChannel;

    #[async_trait]
    impl Catalog for EmptyChannel {
        async fn uploads_playlist(&self, channel_id: &str) -> Result<Option<String>, CatalogError> {
            Ok((channel_id == "UC1").then(|| "UU1".to_string()))
        }

        async fn playlist_page(
            &self,
            _: &str,
            _: Option<&str>,
        ) -> Result<PlaylistPage, CatalogError> {
            Ok(PlaylistPage::default())
        }

        async fn videos(&self, _: &[String]) -> Result<Vec<VideoRecord>, CatalogError> {
            Ok(Vec::new())
        }
    }

    fn app(store: Arc<MemoryStore>) -> Router {
        let config = Config {
            redis_url: "redis://localhost".into(),
            youtube_api_key: "test".into(),
            youtube_api_url: "http://localhost".into(),
            external_host: "stats.local".into(),
            port: 8080,
            rust_log: "info".into(),
        };
        let stats = VideoStats::new(Arc::new(EmptyChannel), Cache::new(store));
        build_router(AppState { stats, config })
    }

    async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, axum::http::HeaderMap, String) {
        let response = app
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, _, body) = send(app(Arc::new(MemoryStore::new())), "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"status\":\"ok\""));
    }

    #[tokio::test]
    async fn test_empty_channel_renders_header_and_zero_total() {
        let store = Arc::new(MemoryStore::new());
        let (status, headers, body) = send(
            app(store.clone()),
            "GET",
            "/v1/stats/get?channel_id=UC1&ad_word=promo&start_date=2024-03-01&end_date=2024-03-31",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "text/csv");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=stats.csv"
        );
        assert!(headers.contains_key(header::ETAG));
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines, vec!["ID,Date,Title,Views,URL", ",,Total views:,0,"]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_bad_date_is_bad_request() {
        let (status, _, body) = send(
            app(Arc::new(MemoryStore::new())),
            "GET",
            "/v1/stats/get?channel_id=UC1&keyword=promo&start_date=01.03.2024",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("VALIDATION_ERROR"));
    }

    #[tokio::test]
    async fn test_missing_parameters_use_error_envelope() {
        for uri in [
            "/v1/stats/get?keyword=promo&start_date=2024-03-01",
            "/v1/stats/get?channel_id=UC1&keyword=promo",
        ] {
            let (status, _, body) = send(app(Arc::new(MemoryStore::new())), "GET", uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            let json: serde_json::Value = serde_json::from_str(&body).unwrap();
            assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
        }
    }

    #[tokio::test]
    async fn test_unknown_channel_is_not_found() {
        let (status, _, _) = send(
            app(Arc::new(MemoryStore::new())),
            "GET",
            "/v1/stats/get?channel_id=UCnope&keyword=promo&start_date=2024-03-01",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_command_returns_import_formula() {
        let (status, _, body) = send(
            app(Arc::new(MemoryStore::new())),
            "GET",
            "/v1/stats/command?channel_id=UC1&keyword=promo&start_date=2024-03-01",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("=IMPORTDATA(\"http://stats.local:8080/v1/stats/get?channel_id=UC1"));
        assert!(body.ends_with(";\",\";\"en_US\")"));
    }

    #[tokio::test]
    async fn test_cache_entries_and_delete() {
        let store = Arc::new(MemoryStore::new());
        store.put_raw("videos:UC1:promo:2024-03-01_", b"[]");
        store.put_raw("videos:UC2:promo:2024-03-01_", b"[]");
        store.put_raw("unrelated", b"1");

        let (status, _, body) = send(app(store.clone()), "GET", "/v1/cache/entries").await;
        assert_eq!(status, StatusCode::OK);
        let listed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(listed["complete"], true);
        assert_eq!(listed["entries"].as_object().unwrap().len(), 2);

        let (status, _, body) =
            send(app(store.clone()), "DELETE", "/v1/cache?pattern=videos:UC1:*").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "{\"deleted\":1}");
        assert_eq!(store.len(), 2);
    }
}
