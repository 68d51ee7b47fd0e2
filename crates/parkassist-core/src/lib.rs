//! Core types and traits for the ParkAssist hybrid-answer engine

pub mod config;
pub mod error;
pub mod message;
pub mod session;
pub mod trace;
pub mod traits;
pub mod types;

pub use config::Settings;
pub use error::{CoreError, Result};
pub use message::{ChatMessage, Role, ToolCall};
pub use session::{PendingClarification, SessionState, Slots, TurnRecord};
pub use trace::{new_trace_id, Trace, TRACE_ID_HEADER};
pub use traits::knowledge::{KnowledgeError, KnowledgeRetriever};
pub use traits::llm::{ChatModel, ChatModelError, ChatResponse, CompletionOptions, ToolSpec};
pub use traits::memory::{SessionStore, SessionStoreError};
pub use traits::tool::{ClarifyTool, ToolOutcome};
pub use types::{
    AnswerCitation, FieldSource, GateDecision, HybridAnswerRequest, HybridAnswerResponse, Intent,
    RetrieveRequest, RetrievedChunk, SlotKey,
};
