use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::auth;
use super::handlers::{bot, feed};

fn build_localhost_cors(api_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_router(state: AppState) -> Router {
    let read_routes = Router::new()
        .route("/api/status", get(bot::get_status))
        .route("/api/logs", get(bot::get_logs))
        .route("/api/groups", get(bot::list_groups))
        .route("/api/events", get(feed::events_endpoint))
        .route("/ws", get(feed::ws_handler))
        .with_state(state.clone());

    let command_routes = Router::new()
        .route("/api/poll/test", post(bot::send_test_poll))
        .route("/api/restart", post(bot::restart))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ))
        .with_state(state.clone());

    read_routes
        .merge(command_routes)
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(state.api_port))
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'self'"),
    );
    response
}
