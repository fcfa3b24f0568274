use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::AppState;

fn is_loopback(host: &str) -> bool {
    host == "127.0.0.1" || host == "::1" || host == "localhost"
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
}

/// Whether a caller may run mutating commands. Without a configured token
/// only a loopback-bound server is open. `query_token` covers WebSocket
/// clients that cannot set headers.
pub(crate) fn is_authorized(state: &AppState, headers: &HeaderMap, query_token: Option<&str>) -> bool {
    match &state.api_token {
        None => is_loopback(&state.api_host),
        Some(expected) => bearer_token(headers)
            .or(query_token)
            .is_some_and(|token| token == expected),
    }
}

pub async fn require_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if is_authorized(&state, req.headers(), None) {
        return next.run(req).await;
    }

    let error = if state.api_token.is_none() {
        "No API token configured. Set api_token before exposing pollbot on a non-loopback address."
    } else {
        "Missing or invalid Authorization header. Use: Bearer <token>"
    };
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "success": false, "error": error })),
    )
        .into_response()
}
