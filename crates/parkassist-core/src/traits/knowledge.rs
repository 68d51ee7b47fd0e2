//! Retrieval seam between the workflow and the knowledge store

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{RetrieveRequest, RetrievedChunk};

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("embedding dim mismatch: expected {expected}, got {actual}")]
    EmbeddingDimMismatch { expected: usize, actual: usize },

    #[error("source_id not found: {0}")]
    SourceNotFound(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

/// Filtered vector + lexical retrieval over knowledge chunks.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    async fn retrieve(
        &self,
        request: &RetrieveRequest,
    ) -> Result<Vec<RetrievedChunk>, KnowledgeError>;
}
