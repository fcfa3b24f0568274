use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::SessionStore;
use crate::core::error::BotError;

/// Process-local store. Sessions do not survive a restart.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn ready(&self) -> Result<(), BotError> {
        Ok(())
    }

    async fn exists(&self, client_id: &str) -> Result<bool, BotError> {
        Ok(self.sessions.lock().await.contains_key(client_id))
    }

    async fn save(&self, client_id: &str, blob: &[u8]) -> Result<(), BotError> {
        self.sessions
            .lock()
            .await
            .insert(client_id.to_string(), blob.to_vec());
        Ok(())
    }

    async fn extract(&self, client_id: &str) -> Result<Option<Vec<u8>>, BotError> {
        Ok(self.sessions.lock().await.get(client_id).cloned())
    }

    async fn delete(&self, client_id: &str) -> Result<(), BotError> {
        self.sessions.lock().await.remove(client_id);
        Ok(())
    }
}
