use serde::Serialize;
use std::fmt;

/// Lifecycle of the messaging client connection. Only `Ready` allows sending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "name", content = "detail", rename_all = "snake_case")]
pub enum ConnectionState {
    Uninitialized,
    Loading,
    #[serde(rename = "awaiting_qr_scan")]
    AwaitingQrScan,
    Authenticated,
    Ready,
    Disconnected(String),
    Failed(String),
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Uninitialized => "uninitialized",
            ConnectionState::Loading => "loading",
            ConnectionState::AwaitingQrScan => "awaiting_qr_scan",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Ready => "ready",
            ConnectionState::Disconnected(_) => "disconnected",
            ConnectionState::Failed(_) => "failed",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected(reason) => write!(f, "disconnected ({})", reason),
            ConnectionState::Failed(error) => write!(f, "failed ({})", error),
            other => f.write_str(other.label()),
        }
    }
}

/// Inputs to the state machine, in the order the client emits them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Start,
    QrReceived(String),
    Authenticated,
    AuthFailure(String),
    Ready,
    Disconnected(String),
    LoadingScreen { percent: u8, message: String },
    /// The client itself went away and cannot be restarted in-process.
    ClientExited(String),
    FatalBootstrapError(String),
}

impl ConnectionEvent {
    fn name(&self) -> &'static str {
        match self {
            ConnectionEvent::Start => "start",
            ConnectionEvent::QrReceived(_) => "qr",
            ConnectionEvent::Authenticated => "authenticated",
            ConnectionEvent::AuthFailure(_) => "auth_failure",
            ConnectionEvent::Ready => "ready",
            ConnectionEvent::Disconnected(_) => "disconnected",
            ConnectionEvent::LoadingScreen { .. } => "loading_screen",
            ConnectionEvent::ClientExited(_) => "client_exited",
            ConnectionEvent::FatalBootstrapError(_) => "fatal_bootstrap_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Side effects requested by a transition. The caller performs them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Log { level: LogLevel, message: String },
    ShowQr(String),
    ReadyReached,
    ConnectionLost(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: ConnectionState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: ConnectionState) -> Self {
        Self {
            next,
            effects: Vec::new(),
        }
    }

    fn log(mut self, level: LogLevel, message: impl Into<String>) -> Self {
        self.effects.push(Effect::Log {
            level,
            message: message.into(),
        });
        self
    }

    fn effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Compute the next state for `event`. `session_exists` is whether the
/// session store held a usable session, which suppresses QR display while a
/// stored session is being restored.
pub fn transition(
    current: &ConnectionState,
    session_exists: bool,
    event: ConnectionEvent,
) -> Transition {
    use ConnectionEvent as Ev;
    use ConnectionState as St;

    match (current, event) {
        (_, Ev::FatalBootstrapError(error)) => Transition::to(St::Failed(error.clone()))
            .log(LogLevel::Error, format!("Bootstrap failed: {}", error)),

        (St::Failed(_), ev) => Transition::to(current.clone()).log(
            LogLevel::Debug,
            format!("Ignoring '{}' event: client has failed", ev.name()),
        ),

        (_, Ev::LoadingScreen { percent, message }) => Transition::to(current.clone()).log(
            LogLevel::Info,
            format!("Loading {}%: {}", percent, message),
        ),

        (_, Ev::ClientExited(reason)) => Transition::to(St::Failed(reason.clone())).log(
            LogLevel::Error,
            format!("Messaging client exited: {}", reason),
        ),

        (St::Uninitialized | St::Disconnected(_), Ev::Start) => {
            Transition::to(St::Loading).log(LogLevel::Info, "Starting messaging client...")
        }

        (St::Loading, Ev::QrReceived(payload)) => {
            if session_exists {
                Transition::to(St::Loading).log(
                    LogLevel::Info,
                    "QR code received while restoring stored session; not displaying it",
                )
            } else {
                Transition::to(St::AwaitingQrScan)
                    .log(LogLevel::Info, "Scan the QR code to log in")
                    .effect(Effect::ShowQr(payload))
            }
        }

        // The client rotates the QR code periodically while waiting.
        (St::AwaitingQrScan, Ev::QrReceived(payload)) => Transition::to(St::AwaitingQrScan)
            .log(LogLevel::Debug, "QR code refreshed")
            .effect(Effect::ShowQr(payload)),

        (St::Loading | St::AwaitingQrScan, Ev::Authenticated) => {
            Transition::to(St::Authenticated).log(LogLevel::Info, "Authenticated successfully")
        }

        (St::Loading | St::AwaitingQrScan, Ev::AuthFailure(message)) => {
            Transition::to(St::Failed(message.clone())).log(
                LogLevel::Error,
                format!("Authentication failed: {}", message),
            )
        }

        (St::Authenticated, Ev::Ready) => Transition::to(St::Ready)
            .log(LogLevel::Info, "Client is ready and connected")
            .effect(Effect::ReadyReached),

        (St::Ready, Ev::Disconnected(reason)) => {
            Transition::to(St::Disconnected(reason.clone()))
                .log(LogLevel::Warn, format!("Client disconnected: {}", reason))
                .effect(Effect::ConnectionLost(reason))
        }

        (_, ev) => Transition::to(current.clone()).log(
            LogLevel::Warn,
            format!("Ignoring '{}' event in state {}", ev.name(), current),
        ),
    }
}
