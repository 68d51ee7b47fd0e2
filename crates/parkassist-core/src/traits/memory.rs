//! Session store trait for TTL-keyed short-term memory

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::session::SessionState;

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Other error: {0}")]
    Other(String),
}

/// TTL-keyed session memory. Expired entries must never be observable via
/// `get`. One write per turn, last-writer-wins by `session_id`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<SessionState>, SessionStoreError>;

    async fn put(
        &self,
        session_id: &str,
        state: SessionState,
        ttl: Duration,
    ) -> Result<(), SessionStoreError>;
}
