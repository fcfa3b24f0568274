use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use super::super::AppState;
use super::super::commands;

pub async fn get_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(commands::get_status(&state))
}

pub async fn get_logs(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(commands::get_logs(&state))
}

pub async fn send_test_poll(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(commands::send_test_poll(&state).await)
}

pub async fn restart(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(commands::restart(&state))
}

#[derive(Deserialize)]
pub struct GroupQuery {
    name: Option<String>,
}

pub async fn list_groups(
    State(state): State<AppState>,
    Query(query): Query<GroupQuery>,
) -> Json<serde_json::Value> {
    Json(commands::list_groups(&state, query.name.as_deref()).await)
}
