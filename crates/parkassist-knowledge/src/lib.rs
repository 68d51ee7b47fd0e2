//! Knowledge store for ParkAssist
//!
//! Sources are addressed by `source_id`; each chunk belongs to exactly one
//! source and carries a fixed-dimension embedding. Retrieval filters on
//! source metadata and orders by cosine distance, falling back to a lexical
//! token-match ranking when no query embedding is given.

mod in_memory;
mod lexical;
mod types;

#[cfg(feature = "postgres")]
mod postgres;

pub use in_memory::InMemoryKnowledgeStore;
pub use lexical::lexical_match_score;
pub use types::{
    ChunkIngestRequest, ChunkPayload, KnowledgeChunk, KnowledgeRepository, KnowledgeSource,
    SourceUpsertRequest,
};

#[cfg(feature = "postgres")]
pub use postgres::PgKnowledgeStore;

pub use parkassist_core::{KnowledgeError, KnowledgeRetriever};
