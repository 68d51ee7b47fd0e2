//! Dialogue resolver for ParkAssist
//!
//! Three strictly sequential stages per turn:
//! `intent_slot_parse → slot_hydrate → react_clarify_gate`. The gate is the
//! single authority allowed to emit `continue_business`; everything else is
//! a terminal clarification the workflow must not execute tool branches for.

mod agent;
mod gate;
mod hydrator;
mod json;
mod parser;
mod resolve;
mod types;

pub use agent::{ClarifyAgentError, ClarifyTask, ReActClarifyAgent, CLARIFY_SYSTEM_PROMPT};
pub use gate::ReactClarifyGate;
pub use hydrator::SlotHydrator;
pub use json::extract_json;
pub use parser::IntentSlotParser;
pub use resolve::{ClarifyReactDebugResult, ResolvedTurnContext, TurnResolver};
pub use types::{ClarifyResult, GateResult, IntentSlotParseResult, SlotHydrateResult};
