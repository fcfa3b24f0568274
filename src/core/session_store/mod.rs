mod memory;
mod sqlite;

pub use memory::MemorySessionStore;
pub use sqlite::SqliteSessionStore;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use super::error::BotError;

/// Persistence for one opaque session blob per client id. The bot itself only
/// ever asks whether a blob exists; the messaging client reads and writes it
/// through a [`SessionBinding`].
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Resolves once the backend accepts queries.
    async fn ready(&self) -> Result<(), BotError>;

    async fn exists(&self, client_id: &str) -> Result<bool, BotError>;

    async fn save(&self, client_id: &str, blob: &[u8]) -> Result<(), BotError>;

    async fn extract(&self, client_id: &str) -> Result<Option<Vec<u8>>, BotError>;

    async fn delete(&self, client_id: &str) -> Result<(), BotError>;
}

/// Open the store named by `url`: `sqlite://<path>` or `memory://`.
pub async fn connect(url: &str) -> Result<Arc<dyn SessionStore>, BotError> {
    let url = url.trim();
    if url == "memory://" || url == "sqlite::memory:" {
        return Ok(Arc::new(MemorySessionStore::new()));
    }
    if let Some(path) = url.strip_prefix("sqlite://") {
        if path.is_empty() {
            return Err(BotError::StoreConnect("sqlite url has no path".to_string()));
        }
        let store = SqliteSessionStore::open(PathBuf::from(path)).await?;
        return Ok(Arc::new(store));
    }
    Err(BotError::StoreConnect(format!(
        "unsupported session store url '{}'",
        url
    )))
}

/// Persistence hooks handed to the messaging client, scoped to one client id.
#[derive(Clone)]
pub struct SessionBinding {
    store: Arc<dyn SessionStore>,
    client_id: String,
}

pub fn bind(store: Arc<dyn SessionStore>, client_id: &str) -> SessionBinding {
    SessionBinding {
        store,
        client_id: client_id.to_string(),
    }
}

impl SessionBinding {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub async fn restore(&self) -> Result<Option<Vec<u8>>, BotError> {
        self.store.extract(&self.client_id).await
    }

    pub async fn persist(&self, blob: &[u8]) -> Result<(), BotError> {
        self.store.save(&self.client_id, blob).await
    }

    pub async fn clear(&self) -> Result<(), BotError> {
        self.store.delete(&self.client_id).await
    }
}
