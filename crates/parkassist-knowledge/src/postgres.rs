//! Postgres + pgvector knowledge store

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::info;

use parkassist_core::{KnowledgeError, KnowledgeRetriever, RetrievedChunk, RetrieveRequest};

use crate::lexical::lexical_match_score;
use crate::types::{
    ChunkIngestRequest, KnowledgeRepository, KnowledgeSource, SourceUpsertRequest,
};

fn map_sqlx_err(err: sqlx::Error) -> KnowledgeError {
    KnowledgeError::Query(err.to_string())
}

#[derive(sqlx::FromRow)]
struct SourceRow {
    id: i64,
    source_id: String,
    doc_type: String,
    source_type: String,
    title: String,
    city_code: Option<String>,
    lot_codes: Vec<String>,
    effective_from: Option<chrono::DateTime<chrono::Utc>>,
    effective_to: Option<chrono::DateTime<chrono::Utc>>,
    version: Option<String>,
    source_uri: Option<String>,
    is_active: bool,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<SourceRow> for KnowledgeSource {
    fn from(row: SourceRow) -> Self {
        KnowledgeSource {
            id: row.id,
            source_id: row.source_id,
            doc_type: row.doc_type,
            source_type: row.source_type,
            title: row.title,
            city_code: row.city_code,
            lot_codes: row.lot_codes,
            effective_from: row.effective_from,
            effective_to: row.effective_to,
            version: row.version,
            source_uri: row.source_uri,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RetrieveRow {
    chunk_id: i64,
    source_pk: i64,
    source_id: String,
    doc_type: String,
    source_type: String,
    title: String,
    content: String,
    scenario_id: Option<String>,
    metadata: serde_json::Value,
    score: Option<f64>,
}

impl From<RetrieveRow> for RetrievedChunk {
    fn from(row: RetrieveRow) -> Self {
        RetrievedChunk {
            chunk_id: row.chunk_id,
            source_pk: row.source_pk,
            source_id: row.source_id,
            doc_type: row.doc_type,
            source_type: row.source_type,
            title: row.title,
            content: row.content,
            scenario_id: row.scenario_id,
            metadata: row.metadata,
            score: row.score,
        }
    }
}

/// Knowledge store over Postgres with a pgvector cosine index on
/// `knowledge_chunks.embedding`.
pub struct PgKnowledgeStore {
    pool: PgPool,
    embedding_dim: usize,
}

impl PgKnowledgeStore {
    pub async fn connect(
        database_url: &str,
        embedding_dim: usize,
        max_connections: u32,
    ) -> Result<Self, KnowledgeError> {
        info!("connecting knowledge store");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|err| KnowledgeError::Connection(err.to_string()))?;
        Ok(Self {
            pool,
            embedding_dim,
        })
    }

    pub fn with_pool(pool: PgPool, embedding_dim: usize) -> Self {
        Self {
            pool,
            embedding_dim,
        }
    }

    fn push_filters<'a>(
        builder: &mut QueryBuilder<'a, Postgres>,
        request: &'a RetrieveRequest,
    ) {
        builder.push(" WHERE 1 = 1");
        if !request.include_inactive {
            builder.push(" AND s.is_active = TRUE");
        }
        if let Some(doc_type) = &request.doc_type {
            builder.push(" AND s.doc_type = ").push_bind(doc_type);
        }
        if let Some(source_type) = &request.source_type {
            builder.push(" AND s.source_type = ").push_bind(source_type);
        }
        if let Some(city_code) = &request.city_code {
            builder.push(" AND s.city_code = ").push_bind(city_code);
        }
        if let Some(lot_code) = &request.lot_code {
            builder
                .push(" AND s.lot_codes @> ARRAY[")
                .push_bind(lot_code)
                .push("]");
        }
        if let Some(source_ids) = &request.source_ids {
            builder
                .push(" AND s.source_id = ANY(")
                .push_bind(source_ids)
                .push(")");
        }
        if let Some(at_time) = request.at_time {
            builder
                .push(" AND (s.effective_from IS NULL OR s.effective_from <= ")
                .push_bind(at_time)
                .push(") AND (s.effective_to IS NULL OR s.effective_to > ")
                .push_bind(at_time)
                .push(")");
        }
    }
}

#[async_trait]
impl KnowledgeRepository for PgKnowledgeStore {
    async fn upsert_source(
        &self,
        request: &SourceUpsertRequest,
    ) -> Result<KnowledgeSource, KnowledgeError> {
        let row: SourceRow = sqlx::query_as(
            r#"
            INSERT INTO knowledge_sources
                (source_id, doc_type, source_type, title, city_code, lot_codes,
                 effective_from, effective_to, version, source_uri, is_active,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, now(), now())
            ON CONFLICT (source_id) DO UPDATE SET
                doc_type = EXCLUDED.doc_type,
                source_type = EXCLUDED.source_type,
                title = EXCLUDED.title,
                city_code = EXCLUDED.city_code,
                lot_codes = EXCLUDED.lot_codes,
                effective_from = EXCLUDED.effective_from,
                effective_to = EXCLUDED.effective_to,
                version = EXCLUDED.version,
                source_uri = EXCLUDED.source_uri,
                is_active = EXCLUDED.is_active,
                updated_at = now()
            RETURNING id, source_id, doc_type, source_type, title, city_code,
                      lot_codes, effective_from, effective_to, version,
                      source_uri, is_active, created_at, updated_at
            "#,
        )
        .bind(&request.source_id)
        .bind(&request.doc_type)
        .bind(&request.source_type)
        .bind(&request.title)
        .bind(&request.city_code)
        .bind(&request.lot_codes)
        .bind(request.effective_from)
        .bind(request.effective_to)
        .bind(&request.version)
        .bind(&request.source_uri)
        .bind(request.is_active)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.into())
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

        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let source_pk: i64 = sqlx::query("SELECT id FROM knowledge_sources WHERE source_id = $1")
            .bind(&request.source_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_err)?
            .map(|row| row.get("id"))
            .ok_or_else(|| KnowledgeError::SourceNotFound(request.source_id.clone()))?;

        if request.replace_existing {
            sqlx::query("DELETE FROM knowledge_chunks WHERE source_pk = $1")
                .bind(source_pk)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        }

        for chunk in &request.chunks {
            sqlx::query(
                r#"
                INSERT INTO knowledge_chunks
                    (source_pk, scenario_id, chunk_index, chunk_text, embedding,
                     metadata, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, now())
                "#,
            )
            .bind(source_pk)
            .bind(&chunk.scenario_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.chunk_text)
            .bind(Vector::from(chunk.embedding.clone()))
            .bind(&chunk.metadata)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }

        sqlx::query("UPDATE knowledge_sources SET updated_at = now() WHERE id = $1")
            .bind(source_pk)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok((source_pk, request.chunks.len()))
    }
}

#[async_trait]
impl KnowledgeRetriever for PgKnowledgeStore {
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

        let select = r#"
            SELECT c.id AS chunk_id, c.source_pk AS source_pk,
                   s.source_id AS source_id, s.doc_type AS doc_type,
                   s.source_type AS source_type, s.title AS title,
                   c.chunk_text AS content, c.scenario_id AS scenario_id,
                   c.metadata AS metadata,
        "#;

        if let Some(embedding) = &request.query_embedding {
            let query_vec = Vector::from(embedding.clone());
            let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(select);
            builder
                .push("(c.embedding <=> ")
                .push_bind(query_vec)
                .push("::vector) AS score");
            builder.push(
                " FROM knowledge_chunks c JOIN knowledge_sources s ON c.source_pk = s.id",
            );
            Self::push_filters(&mut builder, request);
            builder
                .push(" ORDER BY score ASC, s.source_id ASC, c.chunk_index ASC, c.id ASC LIMIT ")
                .push_bind(request.top_k as i64);

            let rows: Vec<RetrieveRow> = builder
                .build_query_as()
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
            return Ok(rows.into_iter().map(Into::into).collect());
        }

        let candidate_limit = (request.top_k * 10).max(100);
        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(select);
        builder.push("NULL::float8 AS score");
        builder.push(" FROM knowledge_chunks c JOIN knowledge_sources s ON c.source_pk = s.id");
        Self::push_filters(&mut builder, request);
        builder
            .push(" ORDER BY s.source_id ASC, c.chunk_index ASC, c.id ASC LIMIT ")
            .push_bind(candidate_limit as i64);

        let rows: Vec<RetrieveRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        let mut items: Vec<RetrievedChunk> = rows.into_iter().map(Into::into).collect();

        if !request.query.trim().is_empty() {
            items.sort_by(|a, b| {
                let score_a = lexical_match_score(&request.query, &a.title, &a.content);
                let score_b = lexical_match_score(&request.query, &b.title, &b.content);
                score_b
                    .cmp(&score_a)
                    .then_with(|| a.source_id.cmp(&b.source_id))
                    .then_with(|| a.chunk_id.cmp(&b.chunk_id))
            });
        }
        items.truncate(request.top_k);
        Ok(items)
    }
}
