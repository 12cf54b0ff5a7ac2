//! HTTP middleware: rate limiting and API key authentication.

use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::error::ApiError;
use super::state::AppState;

/// Rate limiting middleware. Checks per-IP request rate before routing.
pub(crate) async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let ip = addr.ip();
    match state.rate_limiter.check(ip).await {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            tracing::warn!(%ip, retry_after, "rate limit exceeded");
            let body = serde_json::json!({
                "error": {
                    "code": "rate_limited",
                    "message": "rate limit exceeded",
                    "retry_after": retry_after,
                }
            });
            (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
        }
    }
}

fn presented_key(request: &Request<axum::body::Body>) -> Option<&str> {
    let headers = request.headers();
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return Some(token.trim());
        }
    }
    headers.get("x-api-key").and_then(|v| v.to_str().ok())
}

/// Resolve the API key to an [`postmortem_engine::Actor`] and attach it to
/// the request. `/health` is exempt.
pub(crate) async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let actor = match presented_key(&request) {
        None => return ApiError::Unauthenticated("authentication required").into_response(),
        Some(key) => match state.authenticate(key) {
            Some(actor) => actor.clone(),
            None => {
                tracing::debug!(path = %request.uri().path(), "unknown API key");
                return ApiError::Unauthenticated("invalid API key").into_response();
            }
        },
    };
    request.extensions_mut().insert(actor);
    next.run(request).await
}
