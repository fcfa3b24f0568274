//! Pull commands, shared by the HTTP routes and the WebSocket feed.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::AppState;
use crate::core::poll::{DispatchOutcome, DispatchStatus};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub(crate) enum ObserverCommand {
    #[serde(alias = "getStatus")]
    GetStatus,
    #[serde(alias = "getLogs")]
    GetLogs,
    #[serde(alias = "sendTestPoll")]
    SendTestPoll,
    Restart,
    #[serde(alias = "listGroups")]
    ListGroups {
        #[serde(default)]
        name: Option<String>,
    },
}

impl ObserverCommand {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            ObserverCommand::GetStatus => "get_status",
            ObserverCommand::GetLogs => "get_logs",
            ObserverCommand::SendTestPoll => "send_test_poll",
            ObserverCommand::Restart => "restart",
            ObserverCommand::ListGroups { .. } => "list_groups",
        }
    }

    /// Commands that change something need an authorized caller.
    pub(crate) fn is_mutating(&self) -> bool {
        matches!(
            self,
            ObserverCommand::SendTestPoll | ObserverCommand::Restart
        )
    }

    pub(crate) async fn execute(&self, state: &AppState) -> Value {
        match self {
            ObserverCommand::GetStatus => get_status(state),
            ObserverCommand::GetLogs => get_logs(state),
            ObserverCommand::SendTestPoll => send_test_poll(state).await,
            ObserverCommand::Restart => restart(state),
            ObserverCommand::ListGroups { name } => list_groups(state, name.as_deref()).await,
        }
    }
}

pub(crate) fn get_status(state: &AppState) -> Value {
    json!({ "success": true, "status": state.status.snapshot() })
}

pub(crate) fn get_logs(state: &AppState) -> Value {
    json!({ "success": true, "logs": state.status.broadcaster().history() })
}

pub(crate) async fn send_test_poll(state: &AppState) -> Value {
    let dispatcher = state.dispatcher.read().await.clone();
    let outcome = match dispatcher {
        Some(dispatcher) => dispatcher.send_test().await,
        None => {
            let current = state.status.connection_state();
            info!("Skipping test poll: client is not ready ({})", current);
            DispatchOutcome {
                status: DispatchStatus::NotReady {
                    state: current.label().to_string(),
                },
                poll_name: state.test_poll_name.clone(),
                is_test: true,
                duration_ms: 0,
            }
        }
    };
    json!({ "success": outcome.success(), "outcome": outcome })
}

pub(crate) fn restart(state: &AppState) -> Value {
    warn!("Restart requested at {}", Utc::now().to_rfc3339());
    (state.restart)();
    json!({ "success": true, "message": "Restarting..." })
}

pub(crate) async fn list_groups(state: &AppState, name: Option<&str>) -> Value {
    let dispatcher = state.dispatcher.read().await.clone();
    let Some(dispatcher) = dispatcher else {
        return json!({
            "success": false,
            "error": format!("client is not ready (state: {})", state.status.connection_state())
        });
    };
    match dispatcher.list_groups().await {
        Ok(groups) => {
            let groups: Vec<_> = match name {
                Some(name) => groups.into_iter().filter(|g| g.name == name).collect(),
                None => groups,
            };
            json!({ "success": true, "groups": groups })
        }
        Err(e) => json!({ "success": false, "error": e.to_string() }),
    }
}
