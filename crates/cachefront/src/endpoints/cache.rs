use axum::extract::{Path, State};
use axum::http::header::HeaderName;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use cachefront_service::metric;

use crate::service::RequestService;

use super::ResponseError;

/// Response header carrying how the value was obtained.
static X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// GET handler of the read-through cache.
///
/// Serves the raw origin bytes for `key`, fetching and caching them on a
/// miss. Concurrent misses for the same key across all replicas result in a
/// single origin fetch.
pub async fn fetch_cached(
    State(service): State<RequestService>,
    Path(key): Path<String>,
) -> Result<Response, ResponseError> {
    let ttl = service.config().cache.default_ttl;
    let url = service.origin_url(&key)?;
    let fetch = service.origin_fetch(url);

    let (body, outcome) = service
        .cache()
        .get_or_compute::<Bytes, _, _>(&key, ttl, move || fetch)
        .await?;

    metric!(counter("requests.cache") += 1, "outcome" => outcome.as_str());
    tracing::debug!(key, outcome = outcome.as_str(), "Serving cached value");

    let mut response = body.into_response();
    response
        .headers_mut()
        .insert(X_CACHE.clone(), HeaderValue::from_static(outcome.as_str()));
    Ok(response)
}

/// DELETE handler removing a key from the cache.
pub async fn invalidate_cached(
    State(service): State<RequestService>,
    Path(key): Path<String>,
) -> Result<StatusCode, ResponseError> {
    service.cache().invalidate(&key).await?;
    metric!(counter("requests.invalidate") += 1);
    tracing::debug!(key, "Invalidated cache entry");
    Ok(StatusCode::NO_CONTENT)
}
