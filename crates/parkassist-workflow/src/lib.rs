//! Hybrid answer workflow for ParkAssist
//!
//! The workflow is a linear async function with explicit branches: intent
//! router → branch executor → optional retrieval → synthesizer. Every node
//! appends a deterministic trace tag.

mod service;
mod synthesizer;
mod workflow;

pub use service::{HybridAnswerService, MemoryPolicy};
pub use synthesizer::{AnswerSynthesizer, NO_EVIDENCE_CONCLUSION};
pub use workflow::{HybridWorkflow, HybridWorkflowState, WorkflowError};
