use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::IntoResponse,
    response::sse::{Event, KeepAlive, Sse},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::debug;

use super::super::AppState;
use super::super::auth;
use super::super::commands::ObserverCommand;
use crate::core::broadcaster::{Attachment, FeedEvent, LogEntry};
use crate::core::qr;
use crate::core::status::StatusSnapshot;

/// History first, then the snapshot, then the QR if one is on screen.
fn replay(history: Vec<LogEntry>, snapshot: StatusSnapshot) -> Vec<FeedEvent> {
    let qr = snapshot.qr.clone();
    let mut events: Vec<FeedEvent> = history.into_iter().map(FeedEvent::Log).collect();
    events.push(FeedEvent::Status(snapshot));
    if let Some(payload) = qr {
        events.push(FeedEvent::Qr { payload });
    }
    events
}

/// Wire form of a feed event. QR events also carry an SVG rendering.
fn frame(event: &FeedEvent) -> Value {
    let mut value = serde_json::to_value(event).unwrap_or(Value::Null);
    if let FeedEvent::Qr { payload } = event
        && let Ok(svg) = qr::render_svg(payload)
    {
        value["data"]["svg"] = Value::String(svg);
    }
    value
}

fn kind(event: &FeedEvent) -> &'static str {
    match event {
        FeedEvent::Status(_) => "status",
        FeedEvent::Qr { .. } => "qr",
        FeedEvent::Log(_) => "log",
    }
}

fn sse_event(event: &FeedEvent) -> Event {
    Event::default()
        .event(kind(event))
        .data(frame(event).to_string())
}

pub async fn events_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let Attachment {
        history,
        snapshot,
        events,
    } = state.status.broadcaster().attach();

    let replayed: Vec<Result<Event, Infallible>> = replay(history, snapshot)
        .iter()
        .map(|event| Ok(sse_event(event)))
        .collect();
    let live = BroadcastStream::new(events).map(|msg| match msg {
        Ok(event) => Ok(sse_event(&event)),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => Ok(Event::default()
            .event("lagged")
            .data(json!({ "skipped": skipped }).to_string())),
    });

    Sse::new(tokio_stream::iter(replayed).chain(live)).keep_alive(KeepAlive::default())
}

#[derive(Deserialize)]
pub struct SocketQuery {
    token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<SocketQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let authorized = auth::is_authorized(&state, &headers, query.token.as_deref());
    ws.on_upgrade(move |socket| handle_socket(socket, state, authorized))
}

async fn send_json(socket: &mut WebSocket, value: &Value) -> bool {
    socket
        .send(Message::Text(value.to_string().into()))
        .await
        .is_ok()
}

async fn handle_socket(mut socket: WebSocket, state: AppState, authorized: bool) {
    let Attachment {
        history,
        snapshot,
        mut events,
    } = state.status.broadcaster().attach();

    for event in replay(history, snapshot) {
        if !send_json(&mut socket, &frame(&event)).await {
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let value = match event {
                    Ok(event) => frame(&event),
                    Err(RecvError::Lagged(skipped)) => json!({ "type": "lagged", "data": { "skipped": skipped } }),
                    Err(RecvError::Closed) => break,
                };
                if !send_json(&mut socket, &value).await {
                    break;
                }
            }
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let reply = run_command(&state, text.as_str(), authorized).await;
                    if !send_json(&mut socket, &reply).await {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("Observer socket closed");
}

async fn run_command(state: &AppState, text: &str, authorized: bool) -> Value {
    let command = match serde_json::from_str::<ObserverCommand>(text) {
        Ok(command) => command,
        Err(e) => {
            return json!({ "type": "error", "data": { "error": format!("unknown command: {}", e) } });
        }
    };
    if command.is_mutating() && !authorized {
        return json!({
            "type": "reply",
            "command": command.name(),
            "data": { "success": false, "error": "unauthorized" }
        });
    }
    json!({
        "type": "reply",
        "command": command.name(),
        "data": command.execute(state).await
    })
}
