use thiserror::Error;

/// Failures the bot core distinguishes between. Anything that only needs to be
/// reported upward travels as `anyhow::Error` instead.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("session store connection failed: {0}")]
    StoreConnect(String),

    #[error("session store query failed: {0}")]
    StoreQuery(String),

    #[error("authentication failed: {0}")]
    AuthFailure(String),

    #[error("poll dispatch failed: {0}")]
    Dispatch(String),

    #[error("client is not ready (state: {0})")]
    NotReady(String),

    #[error("invalid poll: {0}")]
    InvalidPoll(String),

    #[error("messaging client error: {0}")]
    Client(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("scheduler error: {0}")]
    Schedule(String),
}

impl From<rusqlite::Error> for BotError {
    fn from(e: rusqlite::Error) -> Self {
        BotError::StoreQuery(e.to_string())
    }
}

impl From<tokio_cron_scheduler::JobSchedulerError> for BotError {
    fn from(e: tokio_cron_scheduler::JobSchedulerError) -> Self {
        BotError::Schedule(e.to_string())
    }
}
