//! In-process knowledge store

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use parkassist_core::{KnowledgeError, KnowledgeRetriever, RetrievedChunk, RetrieveRequest};

use crate::lexical::lexical_match_score;
use crate::types::{
    ChunkIngestRequest, KnowledgeChunk, KnowledgeRepository, KnowledgeSource, SourceUpsertRequest,
};

struct Inner {
    sources: Vec<KnowledgeSource>,
    chunks: Vec<KnowledgeChunk>,
    next_source_pk: i64,
    next_chunk_id: i64,
}

/// Knowledge store backed by process memory. Implements the same filter and
/// ordering semantics as the Postgres store, so it doubles as the reference
/// for tests.
pub struct InMemoryKnowledgeStore {
    embedding_dim: usize,
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryKnowledgeStore {
    pub fn new(embedding_dim: usize) -> Self {
        Self {
            embedding_dim,
            inner: Arc::new(RwLock::new(Inner {
                sources: Vec::new(),
                chunks: Vec::new(),
                next_source_pk: 1,
                next_chunk_id: 1,
            })),
        }
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
        let mut dot = 0.0f64;
        let mut norm_a = 0.0f64;
        let mut norm_b = 0.0f64;
        for (x, y) in a.iter().zip(b.iter()) {
            dot += f64::from(*x) * f64::from(*y);
            norm_a += f64::from(*x) * f64::from(*x);
            norm_b += f64::from(*y) * f64::from(*y);
        }
        if norm_a == 0.0 || norm_b == 0.0 {
            return 1.0;
        }
        1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
    }

    fn source_matches(source: &KnowledgeSource, request: &RetrieveRequest) -> bool {
        if !request.include_inactive && !source.is_active {
            return false;
        }
        if let Some(doc_type) = &request.doc_type {
            if &source.doc_type != doc_type {
                return false;
            }
        }
        if let Some(source_type) = &request.source_type {
            if &source.source_type != source_type {
                return false;
            }
        }
        if let Some(city_code) = &request.city_code {
            if source.city_code.as_ref() != Some(city_code) {
                return false;
            }
        }
        if let Some(lot_code) = &request.lot_code {
            if !source.lot_codes.contains(lot_code) {
                return false;
            }
        }
        if let Some(source_ids) = &request.source_ids {
            if !source_ids.contains(&source.source_id) {
                return false;
            }
        }
        if let Some(at_time) = request.at_time {
            if let Some(effective_from) = source.effective_from {
                if effective_from > at_time {
                    return false;
                }
            }
            if let Some(effective_to) = source.effective_to {
                if effective_to <= at_time {
                    return false;
                }
            }
        }
        true
    }

    fn to_item(chunk: &KnowledgeChunk, source: &KnowledgeSource, score: Option<f64>) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: chunk.id,
            source_pk: chunk.source_pk,
            source_id: source.source_id.clone(),
            doc_type: source.doc_type.clone(),
            source_type: source.source_type.clone(),
            title: source.title.clone(),
            content: chunk.chunk_text.clone(),
            scenario_id: chunk.scenario_id.clone(),
            metadata: chunk.metadata.clone(),
            score,
        }
    }
}

impl Clone for InMemoryKnowledgeStore {
    fn clone(&self) -> Self {
        Self {
            embedding_dim: self.embedding_dim,
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl KnowledgeRepository for InMemoryKnowledgeStore {
    async fn upsert_source(
        &self,
        request: &SourceUpsertRequest,
    ) -> Result<KnowledgeSource, KnowledgeError> {
        let now = Utc::now();
        let mut inner = self.inner.write();

        if let Some(existing) = inner
            .sources
            .iter_mut()
            .find(|source| source.source_id == request.source_id)
        {
            existing.doc_type = request.doc_type.clone();
            existing.source_type = request.source_type.clone();
            existing.title = request.title.clone();
            existing.city_code = request.city_code.clone();
            existing.lot_codes = request.lot_codes.clone();
            existing.effective_from = request.effective_from;
            existing.effective_to = request.effective_to;
            existing.version = request.version.clone();
            existing.source_uri = request.source_uri.clone();
            existing.is_active = request.is_active;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let row = KnowledgeSource {
            id: inner.next_source_pk,
            source_id: request.source_id.clone(),
            doc_type: request.doc_type.clone(),
            source_type: request.source_type.clone(),
            title: request.title.clone(),
            city_code: request.city_code.clone(),
            lot_codes: request.lot_codes.clone(),
            effective_from: request.effective_from,
            effective_to: request.effective_to,
            version: request.version.clone(),
            source_uri: request.source_uri.clone(),
            is_active: request.is_active,
            created_at: now,
            updated_at: now,
        };
        inner.next_source_pk += 1;
        inner.sources.push(row.clone());
        Ok(row)
    }

    async fn ingest_chunks(
        &self,
        request: &ChunkIngestRequest,
    ) -> Result<(i64, usize), KnowledgeError> {
        for chunk in &request.chunks {
            if chunk.embedding.len() != self.embedding_dim {
                return Err(KnowledgeError::EmbeddingDimMismatch {
                    expected: self.embedding_dim,
                    actual: chunk.embedding.len(),
                });
            }
        }

        let now = Utc::now();
        let mut inner = self.inner.write();
        let source_pk = inner
            .sources
            .iter()
            .find(|source| source.source_id == request.source_id)
            .map(|source| source.id)
            .ok_or_else(|| KnowledgeError::SourceNotFound(request.source_id.clone()))?;

        if request.replace_existing {
            inner.chunks.retain(|chunk| chunk.source_pk != source_pk);
        }

        for payload in &request.chunks {
            let id = inner.next_chunk_id;
            inner.next_chunk_id += 1;
            inner.chunks.push(KnowledgeChunk {
                id,
                source_pk,
                scenario_id: payload.scenario_id.clone(),
                chunk_index: payload.chunk_index,
                chunk_text: payload.chunk_text.clone(),
                embedding: payload.embedding.clone(),
                metadata: payload.metadata.clone(),
                created_at: now,
            });
        }

        if let Some(source) = inner.sources.iter_mut().find(|s| s.id == source_pk) {
            source.updated_at = now;
        }

        debug!(
            source_id = %request.source_id,
            chunks = request.chunks.len(),
            replace = request.replace_existing,
            "ingested chunks"
        );
        Ok((source_pk, request.chunks.len()))
    }
}

#[async_trait]
impl KnowledgeRetriever for InMemoryKnowledgeStore {
    async fn retrieve(
        &self,
        request: &RetrieveRequest,
    ) -> Result<Vec<RetrievedChunk>, KnowledgeError> {
        if let Some(embedding) = &request.query_embedding {
            if embedding.len() != self.embedding_dim {
                return Err(KnowledgeError::EmbeddingDimMismatch {
                    expected: self.embedding_dim,
                    actual: embedding.len(),
                });
            }
        }

        let inner = self.inner.read();
        let sources_by_pk: HashMap<i64, &KnowledgeSource> = inner
            .sources
            .iter()
            .filter(|source| Self::source_matches(source, request))
            .map(|source| (source.id, source))
            .collect();

        let mut rows: Vec<(&KnowledgeChunk, &KnowledgeSource)> = inner
            .chunks
            .iter()
            .filter_map(|chunk| {
                sources_by_pk
                    .get(&chunk.source_pk)
                    .map(|source| (chunk, *source))
            })
            .collect();

        if let Some(embedding) = &request.query_embedding {
            let mut scored: Vec<(f64, &KnowledgeChunk, &KnowledgeSource)> = rows
                .into_iter()
                .map(|(chunk, source)| {
                    (Self::cosine_distance(&chunk.embedding, embedding), chunk, source)
                })
                .collect();
            scored.sort_by(|a, b| {
                a.0.partial_cmp(&b.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.2.source_id.cmp(&b.2.source_id))
                    .then_with(|| a.1.chunk_index.cmp(&b.1.chunk_index))
                    .then_with(|| a.1.id.cmp(&b.1.id))
            });
            return Ok(scored
                .into_iter()
                .take(request.top_k)
                .map(|(score, chunk, source)| Self::to_item(chunk, source, Some(score)))
                .collect());
        }

        // Lexical fallback: stable candidate order, then token-match ranking.
        rows.sort_by(|a, b| {
            a.1.source_id
                .cmp(&b.1.source_id)
                .then_with(|| a.0.chunk_index.cmp(&b.0.chunk_index))
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        let candidate_limit = (request.top_k * 10).max(100);
        rows.truncate(candidate_limit);

        if !request.query.trim().is_empty() {
            let mut ranked: Vec<(i64, &KnowledgeChunk, &KnowledgeSource)> = rows
                .into_iter()
                .map(|(chunk, source)| {
                    (
                        lexical_match_score(&request.query, &source.title, &chunk.chunk_text),
                        chunk,
                        source,
                    )
                })
                .collect();
            ranked.sort_by(|a, b| {
                b.0.cmp(&a.0)
                    .then_with(|| a.2.source_id.cmp(&b.2.source_id))
                    .then_with(|| a.1.chunk_index.cmp(&b.1.chunk_index))
                    .then_with(|| a.1.id.cmp(&b.1.id))
            });
            return Ok(ranked
                .into_iter()
                .take(request.top_k)
                .map(|(_, chunk, source)| Self::to_item(chunk, source, None))
                .collect());
        }

        Ok(rows
            .into_iter()
            .take(request.top_k)
            .map(|(chunk, source)| Self::to_item(chunk, source, None))
            .collect())
    }
}
