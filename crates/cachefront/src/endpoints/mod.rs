use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use tower::ServiceBuilder;

use cachefront_service::metric;

use crate::service::RequestService;

mod cache;
mod dedup;
mod error;
mod metrics;

pub use error::ResponseError;
use metrics::MetricsLayer;

use cache::{fetch_cached as fetch, invalidate_cached as invalidate};
use dedup::handle_dedup_request as dedup;

pub async fn healthcheck() -> &'static str {
    metric!(counter("healthcheck") += 1);
    "ok"
}

pub fn create_app(service: RequestService) -> Router {
    // The layers here go "top to bottom" according to the reading order here.
    let layer = ServiceBuilder::new()
        .layer(NewSentryLayer::new_from_top())
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(MetricsLayer)
        .layer(DefaultBodyLimit::max(1024 * 1024));
    Router::new()
        .route("/cache/*key", get(fetch).delete(invalidate))
        .route("/dedup/*event", post(dedup))
        .with_state(service)
        .layer(layer)
        // the healthcheck is last, as it will bypass all the middlewares
        .route("/healthcheck", get(healthcheck))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use cachefront_service::config::Config;
    use cachefront_service::lifecycle::ServiceState;
    use cachefront_test::{self as test, MemoryStore};

    use super::*;

    async fn test_app(config: Config, store: Arc<MemoryStore>) -> test::Server {
        let state = ServiceState::with_store(config, store);
        let service = RequestService::new(state).unwrap();
        test::Server::with_router(create_app(service)).await
    }

    fn config_for(origin: &test::OriginServer) -> Config {
        Config {
            origin_url: origin.url("/"),
            namespace: "test".to_owned(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_miss_then_hit() {
        test::setup();
        let origin = test::origin_server().await;
        let store = Arc::new(MemoryStore::new());
        let app = test_app(config_for(&origin), Arc::clone(&store)).await;

        let client = reqwest::Client::new();
        let response = client
            .get(app.url("/cache/user/42"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["x-cache"], "miss");
        assert_eq!(response.text().await.unwrap(), "origin:/user/42");
        assert_eq!(origin.accesses(), 1);

        let response = client
            .get(app.url("/cache/user/42"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["x-cache"], "hit");
        assert_eq!(response.text().await.unwrap(), "origin:/user/42");
        // The hit was served without touching the origin again.
        assert_eq!(origin.accesses(), 1);
    }

    #[tokio::test]
    async fn test_fetch_degraded() {
        test::setup();
        let origin = test::origin_server().await;
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let app = test_app(config_for(&origin), Arc::clone(&store)).await;

        let client = reqwest::Client::new();
        let response = client
            .get(app.url("/cache/user/42"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["x-cache"], "degraded");
        assert_eq!(response.text().await.unwrap(), "origin:/user/42");
    }

    #[tokio::test]
    async fn test_fetch_origin_failure() {
        test::setup();
        let origin = test::origin_server().await;
        let store = Arc::new(MemoryStore::new());
        let app = test_app(config_for(&origin), Arc::clone(&store)).await;

        let client = reqwest::Client::new();
        let response = client
            .get(app.url("/cache/fail/user/42"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 502);

        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["detail"].as_str().unwrap().contains("origin responded with"));

        // Failures are not cached.
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate() {
        test::setup();
        let origin = test::origin_server().await;
        let store = Arc::new(MemoryStore::new());
        let app = test_app(config_for(&origin), Arc::clone(&store)).await;

        let client = reqwest::Client::new();
        client.get(app.url("/cache/user/42")).send().await.unwrap();
        assert_eq!(store.len(), 1);

        let response = client
            .delete(app.url("/cache/user/42"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 204);
        assert!(store.is_empty());

        // The next fetch is a fresh miss.
        let response = client.get(app.url("/cache/user/42")).send().await.unwrap();
        assert_eq!(response.headers()["x-cache"], "miss");
        assert_eq!(origin.accesses(), 2);
    }

    #[tokio::test]
    async fn test_dedup() {
        test::setup();
        let origin = test::origin_server().await;
        let store = Arc::new(MemoryStore::new());
        let app = test_app(config_for(&origin), store).await;

        let client = reqwest::Client::new();
        let url = app.url("/dedup/signal/BTCUSDT/169000000");

        let response = client.post(url.clone()).send().await.unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["accepted"], true);

        let response = client.post(url).send().await.unwrap();
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["accepted"], false);
    }

    #[tokio::test]
    async fn test_dedup_ttl_override() {
        test::setup();
        let origin = test::origin_server().await;
        let store = Arc::new(MemoryStore::new());
        let app = test_app(config_for(&origin), store).await;

        let client = reqwest::Client::new();
        let mut url = app.url("/dedup/signal/a");
        url.set_query(Some("ttl=5m"));

        let response = client.post(url).send().await.unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["accepted"], true);

        let mut url = app.url("/dedup/signal/b");
        url.set_query(Some("ttl=bogus"));
        let response = client.post(url).send().await.unwrap();
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_dedup_store_down() {
        test::setup();
        let origin = test::origin_server().await;
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let app = test_app(config_for(&origin), store).await;

        let client = reqwest::Client::new();
        let response = client
            .post(app.url("/dedup/signal/a"))
            .send()
            .await
            .unwrap();
        // Dedup has no degradation path, the store outage surfaces.
        assert_eq!(response.status(), 503);
    }

    #[tokio::test]
    async fn test_healthcheck() {
        test::setup();
        let origin = test::origin_server().await;
        let store = Arc::new(MemoryStore::new());
        // Liveness does not depend on the store; degraded mode still serves.
        store.set_unavailable(true);
        let app = test_app(config_for(&origin), store).await;

        let response = reqwest::get(app.url("/healthcheck")).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_stampede_timeout_response() {
        test::setup();
        let origin = test::origin_server().await;
        let store = Arc::new(MemoryStore::new());

        let mut config = config_for(&origin);
        config.cache.stampede_timeout = Duration::from_millis(100);
        let app = test_app(config, Arc::clone(&store)).await;

        // A foreign holder that never finishes.
        let marker = cachefront_service::caching::CacheKey::new("test", "user/42").marker();
        use cachefront_service::store::Store;
        store
            .set_if_absent(marker.as_str(), b"1", Duration::from_secs(3600))
            .await
            .unwrap();

        let client = reqwest::Client::new();
        let response = client.get(app.url("/cache/user/42")).send().await.unwrap();
        assert_eq!(response.status(), 503);
        assert!(response.headers().contains_key("retry-after"));
        assert_eq!(origin.accesses(), 0);
    }
}
