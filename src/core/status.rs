use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use super::broadcaster::StatusBroadcaster;
use super::connection::{self, ConnectionEvent, ConnectionState, Effect, LogLevel};
use super::scheduler::TriggerSpec;

/// Observer-facing projection of the bot. `qr` is only ever set while the
/// connection is awaiting a QR scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub state: ConnectionState,
    pub is_ready: bool,
    pub is_authenticated: bool,
    pub awaiting_qr: bool,
    pub qr: Option<String>,
    pub session_exists: bool,
    pub last_poll_sent_at: Option<DateTime<Utc>>,
    pub next_poll_at: Option<DateTime<Utc>>,
    pub schedule: Option<String>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn initial() -> Self {
        Self {
            state: ConnectionState::Uninitialized,
            is_ready: false,
            is_authenticated: false,
            awaiting_qr: false,
            qr: None,
            session_exists: false,
            last_poll_sent_at: None,
            next_poll_at: None,
            schedule: None,
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}

/// Every way shared bot state can change.
#[derive(Debug, Clone)]
pub enum StatusUpdate {
    Connection(ConnectionEvent),
    SessionPresence(bool),
    ScheduleRegistered {
        trigger: TriggerSpec,
        next_poll_at: DateTime<Utc>,
    },
    ScheduleTick {
        at: DateTime<Utc>,
    },
    PollSent {
        at: DateTime<Utc>,
    },
    Error(String),
}

struct State {
    connection: ConnectionState,
    qr: Option<String>,
    session_exists: bool,
    ready_seen: bool,
    trigger: Option<TriggerSpec>,
    last_poll_sent_at: Option<DateTime<Utc>>,
    next_poll_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl State {
    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.connection.clone(),
            is_ready: self.connection.is_ready(),
            is_authenticated: matches!(
                self.connection,
                ConnectionState::Authenticated | ConnectionState::Ready
            ),
            awaiting_qr: self.connection == ConnectionState::AwaitingQrScan,
            qr: self.qr.clone(),
            session_exists: self.session_exists,
            last_poll_sent_at: self.last_poll_sent_at,
            next_poll_at: self.next_poll_at,
            schedule: self.trigger.as_ref().map(TriggerSpec::describe),
            last_error: self.last_error.clone(),
            updated_at: Utc::now(),
        }
    }
}

/// Owner of the connection state and everything observers see.
///
/// `apply` is the only mutation path. It updates state, publishes the new
/// snapshot, and emits log lines before returning, so observers never see a
/// log line ahead of the state it describes.
pub struct BotStatus {
    state: Mutex<State>,
    broadcaster: StatusBroadcaster,
}

impl BotStatus {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                connection: ConnectionState::Uninitialized,
                qr: None,
                session_exists: false,
                ready_seen: false,
                trigger: None,
                last_poll_sent_at: None,
                next_poll_at: None,
                last_error: None,
            }),
            broadcaster: StatusBroadcaster::new(log_capacity, StatusSnapshot::initial()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn broadcaster(&self) -> &StatusBroadcaster {
        &self.broadcaster
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.lock().connection.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.lock().connection.is_ready()
    }

    pub fn session_exists(&self) -> bool {
        self.lock().session_exists
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.lock().snapshot()
    }

    /// Apply one update. Returns the non-log effects the caller must act on:
    /// `ShowQr`, `ConnectionLost`, and `ReadyReached` (the latter only the
    /// first time the client becomes ready in this process).
    pub fn apply(&self, update: StatusUpdate) -> Vec<Effect> {
        let mut state = self.lock();
        let mut effects = Vec::new();

        match update {
            StatusUpdate::Connection(event) => {
                let transition =
                    connection::transition(&state.connection, state.session_exists, event);
                state.connection = transition.next;
                if state.connection != ConnectionState::AwaitingQrScan {
                    state.qr = None;
                }
                if let ConnectionState::Failed(error) = &state.connection {
                    state.last_error = Some(error.clone());
                }
                for effect in transition.effects {
                    match effect {
                        Effect::ShowQr(payload) => {
                            state.qr = Some(payload.clone());
                            effects.push(Effect::ShowQr(payload));
                        }
                        Effect::ReadyReached => {
                            if !state.ready_seen {
                                state.ready_seen = true;
                                effects.push(Effect::ReadyReached);
                            }
                        }
                        other => effects.push(other),
                    }
                }
            }
            StatusUpdate::SessionPresence(exists) => {
                state.session_exists = exists;
            }
            StatusUpdate::ScheduleRegistered {
                trigger,
                next_poll_at,
            } => {
                state.trigger = Some(trigger);
                state.next_poll_at = Some(next_poll_at);
            }
            StatusUpdate::ScheduleTick { at } => {
                state.next_poll_at = state.trigger.as_ref().map(|t| t.next_after(at));
            }
            StatusUpdate::PollSent { at } => {
                state.last_poll_sent_at = Some(at);
                state.next_poll_at = state.trigger.as_ref().map(|t| t.next_after(at));
            }
            StatusUpdate::Error(message) => {
                state.last_error = Some(message);
            }
        }

        self.broadcaster.publish_status(state.snapshot());
        for effect in &effects {
            if let Effect::ShowQr(payload) = effect {
                self.broadcaster.publish_qr(payload);
            }
        }

        // Logs go out through tracing, which feeds the broadcaster history.
        effects.retain(|effect| match effect {
            Effect::Log { level, message } => {
                match level {
                    LogLevel::Debug => debug!("{}", message),
                    LogLevel::Info => info!("{}", message),
                    LogLevel::Warn => warn!("{}", message),
                    LogLevel::Error => error!("{}", message),
                }
                false
            }
            _ => true,
        });
        drop(state);

        effects
    }
}
