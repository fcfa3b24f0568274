use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use super::SessionStore;
use crate::core::error::BotError;
use crate::platform::{NativePlatform, Platform};

pub struct SqliteSessionStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteSessionStore {
    pub async fn open(path: PathBuf) -> Result<Self, BotError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BotError::StoreConnect(e.to_string()))?;
            NativePlatform::restrict_dir_permissions(parent);
        }

        let db = Connection::open(&path).map_err(|e| BotError::StoreConnect(e.to_string()))?;
        NativePlatform::restrict_file_permissions(&path);

        db.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                client_id TEXT PRIMARY KEY,
                blob BLOB NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )
        .map_err(|e| BotError::StoreConnect(e.to_string()))?;

        info!("Session store opened at {}", path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn ready(&self) -> Result<(), BotError> {
        let db = self.db.lock().await;
        db.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| BotError::StoreConnect(e.to_string()))?;
        Ok(())
    }

    async fn exists(&self, client_id: &str) -> Result<bool, BotError> {
        let db = self.db.lock().await;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM sessions WHERE client_id = ?1",
            [client_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    async fn save(&self, client_id: &str, blob: &[u8]) -> Result<(), BotError> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO sessions (client_id, blob, updated_at) VALUES (?1, ?2, CURRENT_TIMESTAMP)
             ON CONFLICT(client_id) DO UPDATE SET blob=excluded.blob, updated_at=CURRENT_TIMESTAMP",
            params![client_id, blob],
        )?;
        Ok(())
    }

    async fn extract(&self, client_id: &str) -> Result<Option<Vec<u8>>, BotError> {
        let db = self.db.lock().await;
        let blob = db
            .query_row(
                "SELECT blob FROM sessions WHERE client_id = ?1",
                [client_id],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(blob)
    }

    async fn delete(&self, client_id: &str) -> Result<(), BotError> {
        let db = self.db.lock().await;
        db.execute("DELETE FROM sessions WHERE client_id = ?1", [client_id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_exists_and_extract() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteSessionStore::open(dir.path().join("sessions.db"))
            .await
            .unwrap();
        store.ready().await.unwrap();

        assert!(!store.exists("pollbot-session").await.unwrap());
        store.save("pollbot-session", b"\x00\x01blob").await.unwrap();
        assert!(store.exists("pollbot-session").await.unwrap());
        assert_eq!(
            store.extract("pollbot-session").await.unwrap(),
            Some(b"\x00\x01blob".to_vec())
        );
    }

    #[tokio::test]
    async fn save_overwrites_existing_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteSessionStore::open(dir.path().join("sessions.db"))
            .await
            .unwrap();
        store.save("bot", b"old").await.unwrap();
        store.save("bot", b"new").await.unwrap();
        assert_eq!(store.extract("bot").await.unwrap(), Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn session_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sessions.db");
        {
            let store = SqliteSessionStore::open(path.clone()).await.unwrap();
            store.save("bot", b"persisted").await.unwrap();
        }
        let reopened = SqliteSessionStore::open(path).await.unwrap();
        assert!(reopened.exists("bot").await.unwrap());
    }

    #[tokio::test]
    async fn delete_missing_session_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteSessionStore::open(dir.path().join("s.db"))
            .await
            .unwrap();
        store.delete("ghost").await.unwrap();
        assert_eq!(store.extract("ghost").await.unwrap(), None);
    }
}
