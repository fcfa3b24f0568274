pub(crate) mod auth;
mod commands;
mod handlers;
mod router;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::core::bootstrap::DispatcherSlot;
use crate::core::lifecycle::LifecycleComponent;
use crate::core::status::BotStatus;

/// Called for the `restart` command after the reply has been produced.
pub type RestartHook = Arc<dyn Fn() + Send + Sync>;

pub struct ObserverServerConfig {
    pub status: Arc<BotStatus>,
    pub dispatcher: DispatcherSlot,
    pub restart: RestartHook,
    pub api_token: Option<String>,
    pub api_host: String,
    pub api_port: u16,
    pub test_poll_name: String,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) status: Arc<BotStatus>,
    pub(crate) dispatcher: DispatcherSlot,
    pub(crate) restart: RestartHook,
    pub(crate) api_token: Option<String>,
    pub(crate) api_host: String,
    pub(crate) api_port: u16,
    pub(crate) test_poll_name: String,
}

/// HTTP + SSE + WebSocket surface for observers and the CLI.
pub struct ObserverServer {
    state: AppState,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ObserverServer {
    pub fn new(config: ObserverServerConfig) -> Self {
        Self {
            state: AppState {
                status: config.status,
                dispatcher: config.dispatcher,
                restart: config.restart,
                api_token: config.api_token,
                api_host: config.api_host,
                api_port: config.api_port,
                test_poll_name: config.test_poll_name,
            },
            shutdown: None,
        }
    }
}

#[async_trait]
impl LifecycleComponent for ObserverServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("Observer server initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.state.api_host, self.state.api_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind observer server to {}", addr))?;
        let app = router::build_router(self.state.clone());

        let (tx, rx) = oneshot::channel::<()>();
        self.shutdown = Some(tx);
        tokio::spawn(async move {
            info!("Observer server running at http://{}", addr);
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = rx.await;
            });
            if let Err(e) = serve.await {
                error!("Observer server crashed: {}", e);
            }
        });
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("Observer server shutting down...");
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        Ok(())
    }
}
