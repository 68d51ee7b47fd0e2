//! Redis-backed session store

use async_trait::async_trait;
use std::time::Duration;

use parkassist_core::{SessionState, SessionStore, SessionStoreError};

fn map_redis_err(err: redis::RedisError) -> SessionStoreError {
    SessionStoreError::Connection(err.to_string())
}

/// Session store over Redis. Entries are JSON blobs written with `SETEX`,
/// so expiry is enforced server-side.
pub struct RedisSessionStore {
    client: redis::Client,
    prefix: String,
}

impl RedisSessionStore {
    pub fn new(url: &str) -> Result<Self, SessionStoreError> {
        let client = redis::Client::open(url).map_err(map_redis_err)?;
        Ok(Self {
            client,
            prefix: "parkassist:session:".to_string(),
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn session_key(&self, session_id: &str) -> String {
        format!("{}{}", self.prefix, session_id)
    }

    async fn get_connection(
        &self,
    ) -> Result<redis::aio::MultiplexedConnection, SessionStoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_redis_err)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionState>, SessionStoreError> {
        let mut conn = self.get_connection().await?;
        let data: Option<String> = redis::cmd("GET")
            .arg(self.session_key(session_id))
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;

        match data {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|err| SessionStoreError::Serialization(err.to_string())),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        session_id: &str,
        state: SessionState,
        ttl: Duration,
    ) -> Result<(), SessionStoreError> {
        let data = serde_json::to_string(&state)
            .map_err(|err| SessionStoreError::Serialization(err.to_string()))?;
        let ttl_seconds = ttl.as_secs().max(1);

        let mut conn = self.get_connection().await?;
        redis::cmd("SETEX")
            .arg(self.session_key(session_id))
            .arg(ttl_seconds)
            .arg(data)
            .query_async::<()>(&mut conn)
            .await
            .map_err(map_redis_err)
    }
}
