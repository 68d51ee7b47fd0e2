//! Knowledge entities and repository trait

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use parkassist_core::{KnowledgeError, KnowledgeRetriever};

fn default_true() -> bool {
    true
}

/// One knowledge source row, addressed by its unique `source_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSource {
    pub id: i64,
    pub source_id: String,
    pub doc_type: String,
    pub source_type: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city_code: Option<String>,
    #[serde(default)]
    pub lot_codes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_to: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One stored chunk belonging to a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: i64,
    pub source_pk: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_id: Option<String>,
    pub chunk_index: i32,
    pub chunk_text: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Upsert request; on conflict every updatable field is replaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceUpsertRequest {
    pub source_id: String,
    pub doc_type: String,
    pub source_type: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city_code: Option<String>,
    #[serde(default)]
    pub lot_codes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_to: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_id: Option<String>,
    pub chunk_index: i32,
    pub chunk_text: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkIngestRequest {
    pub source_id: String,
    #[serde(default)]
    pub replace_existing: bool,
    pub chunks: Vec<ChunkPayload>,
}

/// Full repository surface: retrieval plus ingestion.
#[async_trait]
pub trait KnowledgeRepository: KnowledgeRetriever {
    async fn upsert_source(
        &self,
        request: &SourceUpsertRequest,
    ) -> Result<KnowledgeSource, KnowledgeError>;

    /// Ingest chunks for an existing source. Returns the source primary key
    /// and the number of chunks written.
    async fn ingest_chunks(
        &self,
        request: &ChunkIngestRequest,
    ) -> Result<(i64, usize), KnowledgeError>;
}
