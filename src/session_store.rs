//! Session Store: Redis-backed cache of authenticated browser state, TTL-validated.
//!
//! A `Clone`-able wrapper around a connection manager, opened once at
//! startup, over a Redis key-value TTL cache rather than a durable
//! cross-process store.

use redis::AsyncCommands;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::models::BrowserState;
use crate::utils::constants::SESSION_TTL_SECS;

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("redis connection error: {0}")]
    Connection(#[from] redis::RedisError),
    #[error("failed to (de)serialize browser state: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Persists authenticated `BrowserState` per site, with a 23h TTL.
#[derive(Clone)]
pub struct SessionStore {
    manager: redis::aio::ConnectionManager,
}

impl SessionStore {
    pub async fn connect(redis_url: &str) -> Result<Self, SessionStoreError> {
        let client = redis::Client::open(redis_url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }

    fn key(site_id: Uuid) -> String {
        format!("hoistscout:session:{site_id}")
    }

    /// Persist `state` for `site_id`, overwriting whatever was there
    /// (last-writer-wins per §5).
    pub async fn save(&self, site_id: Uuid, state: &BrowserState) -> Result<(), SessionStoreError> {
        let payload = serde_json::to_vec(state)?;
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(Self::key(site_id), payload, SESSION_TTL_SECS)
            .await?;
        debug!(%site_id, "session saved");
        Ok(())
    }

    /// Load a still-valid `BrowserState` for `site_id`, or `None` if absent
    /// or expired; the caller must then run full authentication.
    pub async fn load(&self, site_id: Uuid) -> Result<Option<BrowserState>, SessionStoreError> {
        let mut conn = self.manager.clone();
        let payload: Option<Vec<u8>> = conn.get(Self::key(site_id)).await?;
        match payload {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn invalidate(&self, site_id: Uuid) -> Result<(), SessionStoreError> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(Self::key(site_id)).await?;
        debug!(%site_id, "session invalidated");
        Ok(())
    }
}
