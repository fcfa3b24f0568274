use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use super::RunFlags;
use crate::core::bootstrap::{Bootstrap, DispatcherSlot};
use crate::core::client::{BridgeClientFactory, ClientFactory};
use crate::core::config::BotConfig;
use crate::core::lifecycle::LifecycleManager;
use crate::core::scheduler::PollScheduler;
use crate::core::status::BotStatus;
use crate::core::terminal;
use crate::interfaces::web::{ObserverServer, ObserverServerConfig, RestartHook};
use crate::logging::FeedMakeWriter;

// Long enough for the restart reply to reach the caller.
const RESTART_GRACE: Duration = Duration::from_millis(500);

pub async fn run_bot(flags: RunFlags) -> Result<()> {
    let mut config = BotConfig::load(flags.config.as_deref()).await?;
    if let Some(host) = flags.host {
        config.host = host;
    }
    if let Some(port) = flags.port {
        config.port = port;
    }
    config.validate()?;
    let config = Arc::new(config);

    let status = Arc::new(BotStatus::new(config.log_capacity));
    let make_writer = FeedMakeWriter {
        status: status.clone(),
        suppress_stdout: false,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if flags.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .with_ansi(false)
        .with_writer(make_writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    terminal::print_banner();
    terminal::print_status("Group", &config.group_id);
    terminal::print_status("Schedule", &config.trigger()?.describe());
    terminal::print_status("Session", &config.client_id);

    info!("Starting pollbot...");
    let mut lifecycle = LifecycleManager::new().await?;
    let scheduler = Arc::new(PollScheduler::new(lifecycle.scheduler(), status.clone()));
    let dispatcher: DispatcherSlot = Arc::new(RwLock::new(None));

    let restart: RestartHook = Arc::new(|| {
        tokio::spawn(async {
            tokio::time::sleep(RESTART_GRACE).await;
            std::process::exit(0);
        });
    });
    let server = ObserverServer::new(ObserverServerConfig {
        status: status.clone(),
        dispatcher: dispatcher.clone(),
        restart,
        api_token: config.api_token.clone(),
        api_host: config.host.clone(),
        api_port: config.port,
        test_poll_name: format!("{}{}", config.poll.test_prefix, config.poll.name),
    });
    lifecycle.attach(Arc::new(Mutex::new(server)));
    lifecycle.start().await?;
    terminal::print_link("Status", &format!("http://{}/api/status", config.bind_addr()));
    terminal::print_link("Live feed", &format!("http://{}/api/events", config.bind_addr()));

    let factory: Arc<dyn ClientFactory> = Arc::new(BridgeClientFactory::new(
        &config.bridge.command,
        &config.bridge.args,
    ));
    let bootstrap = Bootstrap::new(
        config.clone(),
        status.clone(),
        scheduler,
        factory,
        dispatcher,
    );
    // A failed bootstrap leaves the bot in `Failed` for observers to see.
    let bot = tokio::spawn(async move { bootstrap.run().await.ok() });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down pollbot...");
    bot.abort();
    lifecycle.shutdown().await?;

    Ok(())
}
