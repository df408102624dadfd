use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use cachefront_service::metric;

use crate::service::{RequestService, effective_ttl};

use super::ResponseError;

#[derive(Debug, Deserialize)]
pub struct DedupQuery {
    /// Optional override for the dedup window, in humantime notation
    /// (for example `90s` or `15m`).
    #[serde(default, with = "humantime_serde")]
    ttl: Option<Duration>,
}

#[derive(Debug, Serialize)]
pub struct DedupResponse {
    /// `true` iff this was the first occurrence of the event within the
    /// dedup window. Exactly one caller per window receives `true`.
    accepted: bool,
}

/// POST handler of the first-writer-wins dedup check.
pub async fn handle_dedup_request(
    State(service): State<RequestService>,
    Path(event): Path<String>,
    Query(query): Query<DedupQuery>,
) -> Result<Json<DedupResponse>, ResponseError> {
    let ttl = effective_ttl(query.ttl, service.config().cache.dedup_ttl);
    let accepted = service.cache().dedup_once(&event, ttl).await?;

    metric!(
        counter("requests.dedup") += 1,
        "accepted" => if accepted { "true" } else { "false" },
    );
    tracing::debug!(event, accepted, "Deduplicated event");

    Ok(Json(DedupResponse { accepted }))
}
