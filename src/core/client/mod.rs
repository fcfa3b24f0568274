mod bridge;
#[cfg(test)]
pub mod fake;

pub use bridge::{BridgeClient, BridgeClientFactory};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::connection::ConnectionEvent;
use super::error::BotError;
use super::poll::PollJob;
use super::session_store::SessionBinding;

/// Events emitted by the underlying messaging client, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Qr(String),
    Authenticated,
    AuthFailure(String),
    Ready,
    Disconnected(String),
    LoadingScreen { percent: u8, message: String },
    /// The client is gone for good, e.g. its process died.
    Exited(String),
    SessionSaved,
    SessionRemoved,
}

impl ClientEvent {
    /// The state machine input for this event, if it is one.
    pub fn into_connection_event(self) -> Option<ConnectionEvent> {
        match self {
            ClientEvent::Qr(payload) => Some(ConnectionEvent::QrReceived(payload)),
            ClientEvent::Authenticated => Some(ConnectionEvent::Authenticated),
            ClientEvent::AuthFailure(message) => Some(ConnectionEvent::AuthFailure(message)),
            ClientEvent::Ready => Some(ConnectionEvent::Ready),
            ClientEvent::Disconnected(reason) => Some(ConnectionEvent::Disconnected(reason)),
            ClientEvent::Exited(reason) => Some(ConnectionEvent::ClientExited(reason)),
            ClientEvent::LoadingScreen { percent, message } => {
                Some(ConnectionEvent::LoadingScreen { percent, message })
            }
            ClientEvent::SessionSaved | ClientEvent::SessionRemoved => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub id: String,
    pub name: String,
}

#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Start connecting. Progress is reported through the event channel.
    async fn initialize(&self) -> Result<(), BotError>;

    async fn send_poll(&self, destination: &str, poll: &PollJob) -> Result<(), BotError>;

    async fn list_groups(&self) -> Result<Vec<GroupInfo>, BotError>;
}

pub struct ClientHandle {
    pub client: Arc<dyn MessagingClient>,
    pub events: mpsc::Receiver<ClientEvent>,
}

/// Builds the messaging client with its session persistence wired in.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn build(&self, binding: SessionBinding) -> Result<ClientHandle, BotError>;
}
