//! In-process client double. Tests drive the event stream by hand.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use super::{ClientEvent, ClientFactory, ClientHandle, GroupInfo, MessagingClient};
use crate::core::error::BotError;
use crate::core::poll::PollJob;
use crate::core::session_store::SessionBinding;

#[derive(Default)]
struct Behaviour {
    send_error: Option<String>,
    send_delay: Option<Duration>,
    initialize_error: Option<String>,
    groups: Vec<GroupInfo>,
}

pub struct FakeClient {
    events: mpsc::Sender<ClientEvent>,
    sent: Mutex<Vec<(String, PollJob)>>,
    behaviour: Mutex<Behaviour>,
    initialize_calls: AtomicUsize,
    binding: Mutex<Option<SessionBinding>>,
}

impl FakeClient {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<ClientEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let client = Arc::new(Self {
            events: tx,
            sent: Mutex::new(Vec::new()),
            behaviour: Mutex::new(Behaviour::default()),
            initialize_calls: AtomicUsize::new(0),
            binding: Mutex::new(None),
        });
        (client, rx)
    }

    pub async fn emit(&self, event: ClientEvent) {
        self.events.send(event).await.unwrap();
    }

    pub fn sent(&self) -> Vec<(String, PollJob)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    pub fn binding(&self) -> Option<SessionBinding> {
        self.binding.lock().unwrap().clone()
    }

    pub fn fail_sends(&self, message: &str) {
        self.behaviour.lock().unwrap().send_error = Some(message.to_string());
    }

    pub fn delay_sends(&self, delay: Duration) {
        self.behaviour.lock().unwrap().send_delay = Some(delay);
    }

    pub fn fail_initialize(&self, message: &str) {
        self.behaviour.lock().unwrap().initialize_error = Some(message.to_string());
    }

    pub fn set_groups(&self, groups: Vec<GroupInfo>) {
        self.behaviour.lock().unwrap().groups = groups;
    }
}

#[async_trait]
impl MessagingClient for FakeClient {
    async fn initialize(&self) -> Result<(), BotError> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        let error = self.behaviour.lock().unwrap().initialize_error.clone();
        match error {
            Some(message) => Err(BotError::Client(message)),
            None => Ok(()),
        }
    }

    async fn send_poll(&self, destination: &str, poll: &PollJob) -> Result<(), BotError> {
        let (delay, error) = {
            let behaviour = self.behaviour.lock().unwrap();
            (behaviour.send_delay, behaviour.send_error.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = error {
            return Err(BotError::Dispatch(message));
        }
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), poll.clone()));
        Ok(())
    }

    async fn list_groups(&self) -> Result<Vec<GroupInfo>, BotError> {
        let groups = self.behaviour.lock().unwrap().groups.clone();
        Ok(groups)
    }
}

/// Hands out one prepared [`FakeClient`], or fails every build.
pub struct FakeFactory {
    handle: Mutex<Option<(Arc<FakeClient>, mpsc::Receiver<ClientEvent>)>>,
    error: Option<String>,
}

impl FakeFactory {
    pub fn new(client: Arc<FakeClient>, events: mpsc::Receiver<ClientEvent>) -> Self {
        Self {
            handle: Mutex::new(Some((client, events))),
            error: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            handle: Mutex::new(None),
            error: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl ClientFactory for FakeFactory {
    async fn build(&self, binding: SessionBinding) -> Result<ClientHandle, BotError> {
        if let Some(message) = &self.error {
            return Err(BotError::Client(message.clone()));
        }
        let prepared = self.handle.lock().unwrap().take();
        let (client, events) =
            prepared.ok_or_else(|| BotError::Client("fake client already built".to_string()))?;
        *client.binding.lock().unwrap() = Some(binding);
        Ok(ClientHandle { client, events })
    }
}
