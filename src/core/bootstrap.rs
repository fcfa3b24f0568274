use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::client::{ClientEvent, ClientFactory, ClientHandle, MessagingClient};
use super::config::BotConfig;
use super::connection::{ConnectionEvent, Effect};
use super::dispatcher::PollDispatcher;
use super::error::BotError;
use super::scheduler::{PollScheduler, ScheduledAction, TriggerSpec};
use super::session_store;
use super::status::{BotStatus, StatusUpdate};
use super::terminal;

/// Filled in once the client exists. Readers treat `None` as not ready.
pub type DispatcherSlot = Arc<RwLock<Option<Arc<PollDispatcher>>>>;

pub struct Bootstrap {
    config: Arc<BotConfig>,
    status: Arc<BotStatus>,
    scheduler: Arc<PollScheduler>,
    factory: Arc<dyn ClientFactory>,
    dispatcher: DispatcherSlot,
}

/// Handles to a bot whose client has been started.
pub struct RunningBot {
    pub client: Arc<dyn MessagingClient>,
    pub dispatcher: Arc<PollDispatcher>,
    pub events: JoinHandle<()>,
}

impl Bootstrap {
    pub fn new(
        config: Arc<BotConfig>,
        status: Arc<BotStatus>,
        scheduler: Arc<PollScheduler>,
        factory: Arc<dyn ClientFactory>,
        dispatcher: DispatcherSlot,
    ) -> Self {
        Self {
            config,
            status,
            scheduler,
            factory,
            dispatcher,
        }
    }

    /// Store connect, session check, client construction, client start.
    /// The first failing stage moves the bot to `Failed` and is returned;
    /// nothing is retried.
    pub async fn run(&self) -> Result<RunningBot, BotError> {
        match self.sequence().await {
            Ok(bot) => Ok(bot),
            Err(e) => {
                self.status
                    .apply(StatusUpdate::Connection(ConnectionEvent::FatalBootstrapError(
                        e.to_string(),
                    )));
                Err(e)
            }
        }
    }

    async fn sequence(&self) -> Result<RunningBot, BotError> {
        let config = &self.config;
        let trigger = config.trigger()?;

        info!("Connecting to session store...");
        let store = session_store::connect(&config.session_store).await?;
        store.ready().await?;
        tokio::time::sleep(config.store_settle()).await;

        let session_exists = match store.exists(&config.client_id).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!("Could not check for a stored session, assuming none: {}", e);
                false
            }
        };
        self.status
            .apply(StatusUpdate::SessionPresence(session_exists));
        if session_exists {
            info!("Found stored session for '{}', restoring it", config.client_id);
        } else {
            info!(
                "No stored session for '{}', a QR scan will be required",
                config.client_id
            );
        }

        let binding = session_store::bind(store, &config.client_id);
        let ClientHandle { client, events } = self.factory.build(binding).await?;
        let dispatcher = Arc::new(PollDispatcher::new(
            client.clone(),
            self.status.clone(),
            &config.group_id,
            config.poll.clone(),
        ));
        *self.dispatcher.write().await = Some(dispatcher.clone());

        tokio::time::sleep(config.client_settle()).await;

        let pump = EventPump {
            status: self.status.clone(),
            scheduler: self.scheduler.clone(),
            dispatcher: dispatcher.clone(),
            client: client.clone(),
            trigger,
            reconnect: config.reconnect,
        };
        let events = tokio::spawn(pump.run(events));

        self.status
            .apply(StatusUpdate::Connection(ConnectionEvent::Start));
        if let Err(e) = client.initialize().await {
            events.abort();
            return Err(e);
        }

        Ok(RunningBot {
            client,
            dispatcher,
            events,
        })
    }
}

/// Feeds client events through the status owner, in emission order, and
/// carries out the effects that come back.
struct EventPump {
    status: Arc<BotStatus>,
    scheduler: Arc<PollScheduler>,
    dispatcher: Arc<PollDispatcher>,
    client: Arc<dyn MessagingClient>,
    trigger: TriggerSpec,
    reconnect: bool,
}

impl EventPump {
    async fn run(self, mut events: mpsc::Receiver<ClientEvent>) {
        while let Some(event) = events.recv().await {
            debug!("Client event: {:?}", event);
            let update = match event {
                ClientEvent::SessionSaved => StatusUpdate::SessionPresence(true),
                ClientEvent::SessionRemoved => StatusUpdate::SessionPresence(false),
                other => match other.into_connection_event() {
                    Some(event) => StatusUpdate::Connection(event),
                    None => continue,
                },
            };
            for effect in self.status.apply(update) {
                self.perform(effect).await;
            }
        }
        debug!("Client event stream ended");
    }

    async fn perform(&self, effect: Effect) {
        match effect {
            Effect::ShowQr(payload) => terminal::print_qr(&payload),
            Effect::ReadyReached => self.register_schedule().await,
            Effect::ConnectionLost(reason) => self.handle_disconnect(&reason),
            Effect::Log { .. } => {}
        }
    }

    async fn register_schedule(&self) {
        let dispatcher = self.dispatcher.clone();
        let action: ScheduledAction = Arc::new(move || {
            let dispatcher = dispatcher.clone();
            Box::pin(async move {
                dispatcher.send_scheduled().await;
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });

        if let Err(e) = self.scheduler.schedule(self.trigger.clone(), action).await {
            error!("Failed to schedule the recurring poll: {}", e);
            self.status.apply(StatusUpdate::Error(e.to_string()));
        }
    }

    fn handle_disconnect(&self, reason: &str) {
        if !self.reconnect {
            warn!(
                "Reconnect is disabled; restart pollbot to reconnect (reason: {})",
                reason
            );
            return;
        }

        self.status
            .apply(StatusUpdate::Connection(ConnectionEvent::Start));
        let client = self.client.clone();
        let status = self.status.clone();
        tokio::spawn(async move {
            if let Err(e) = client.initialize().await {
                status.apply(StatusUpdate::Connection(
                    ConnectionEvent::FatalBootstrapError(format!("reconnect failed: {}", e)),
                ));
            }
        });
    }
}
