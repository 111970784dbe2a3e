use axum::{
    extract::{Query, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::warn;

use crate::errors::ApiError;
use crate::observability::AUTH_REJECTED_TOTAL;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "X-API-Key";
pub const API_KEY_QUERY: &str = "api_key";

#[derive(Debug, Deserialize)]
struct ApiKeyQuery {
    api_key: Option<String>,
}

/// Where the candidate key was found; logged on rejection instead of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeySource {
    Header,
    Query,
    Missing,
}

/// Header first; an absent or empty header falls back to the `api_key` query parameter.
fn candidate_key(req: &Request) -> (String, KeySource) {
    let from_header = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty());
    if let Some(k) = from_header {
        return (k.to_string(), KeySource::Header);
    }

    let from_query = Query::<ApiKeyQuery>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(q)| q.api_key)
        .filter(|s| !s.is_empty());
    match from_query {
        Some(k) => (k, KeySource::Query),
        None => (String::new(), KeySource::Missing),
    }
}

/// Case-insensitive comparison; an empty candidate never matches.
pub fn key_matches(candidate: &str, expected: &str) -> bool {
    !candidate.is_empty() && candidate.to_lowercase() == expected.to_lowercase()
}

/// Middleware: require the configured key in `X-API-Key` (or query `api_key`).
/// On mismatch the wrapped handler is never invoked.
pub async fn require_api_key(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let (key, source) = candidate_key(&req);
    if !key_matches(&key, &state.api_key) {
        AUTH_REJECTED_TOTAL.inc();
        warn!(path = %req.uri().path(), source = ?source, "rejected request: invalid or missing API key");
        return ApiError::unauthorized().into_response();
    }
    next.run(req).await
}
