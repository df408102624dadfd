use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use sentry::integrations::anyhow::capture_anyhow;
use serde::{Deserialize, Serialize};

use cachefront_service::caching::CacheError;

#[derive(Debug)]
pub struct ResponseError {
    status: StatusCode,
    err: anyhow::Error,
    /// Propagated as a `Retry-After` header, in whole seconds.
    retry_after: Option<u64>,
}

impl From<CacheError> for ResponseError {
    fn from(err: CacheError) -> Self {
        let (status, retry_after) = match &err {
            // The value is being recomputed by someone else; asking again
            // shortly is the correct client behavior.
            CacheError::StampedeTimeout(wait) => {
                (StatusCode::SERVICE_UNAVAILABLE, Some(wait.as_secs().max(1)))
            }
            CacheError::Compute(_) => (StatusCode::BAD_GATEWAY, None),
            CacheError::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
            CacheError::Store(_) => (StatusCode::SERVICE_UNAVAILABLE, None),
        };

        Self {
            status,
            err: err.into(),
            retry_after,
        }
    }
}

impl From<(StatusCode, anyhow::Error)> for ResponseError {
    fn from((status, err): (StatusCode, anyhow::Error)) -> Self {
        Self {
            status,
            err,
            retry_after: None,
        }
    }
}

impl From<anyhow::Error> for ResponseError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            err,
            retry_after: None,
        }
    }
}

impl IntoResponse for ResponseError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            capture_anyhow(&self.err);
        }
        let mut response = Json(ApiErrorResponse::from(self.err)).into_response();
        *response.status_mut() = self.status;
        if let Some(secs) = self.retry_after {
            response
                .headers_mut()
                .insert("retry-after", HeaderValue::from(secs));
        }
        response
    }
}

/// An error response from an api.
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct ApiErrorResponse {
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    causes: Option<Vec<String>>,
}

impl From<anyhow::Error> for ApiErrorResponse {
    fn from(err: anyhow::Error) -> Self {
        let mut chain = err.chain().map(|err| err.to_string());
        let detail = chain.next();
        let causes: Vec<_> = chain.collect();
        let causes = if causes.is_empty() {
            None
        } else {
            Some(causes)
        };

        ApiErrorResponse { detail, causes }
    }
}
