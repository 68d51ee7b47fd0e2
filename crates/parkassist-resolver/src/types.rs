//! Stage artifacts of the resolver pipeline

use std::collections::{BTreeMap, HashMap};

use parkassist_core::{
    ChatMessage, FieldSource, GateDecision, HybridAnswerRequest, Intent, SlotKey,
};

/// Stage-1 artifact: intent and slots parsed from the raw turn.
#[derive(Debug, Clone)]
pub struct IntentSlotParseResult {
    pub payload: HybridAnswerRequest,
    pub intent: Option<Intent>,
    pub intent_confidence: Option<f64>,
    pub field_sources: HashMap<SlotKey, FieldSource>,
    pub missing_required_slots: Vec<SlotKey>,
    pub ambiguities: Vec<String>,
    pub trace: Vec<String>,
}

/// Stage-2 artifact: slots hydrated from session memory.
#[derive(Debug, Clone)]
pub struct SlotHydrateResult {
    pub payload: HybridAnswerRequest,
    pub field_sources: HashMap<SlotKey, FieldSource>,
    pub missing_required_slots: Vec<SlotKey>,
    pub trace: Vec<String>,
}

/// Output of one ReAct clarify run.
#[derive(Debug, Clone)]
pub struct ClarifyResult {
    pub decision: GateDecision,
    pub clarify_question: Option<String>,
    /// Slot snapshot after applying `slot_updates` over the hydrated payload.
    pub resolved_slots: BTreeMap<String, String>,
    pub slot_updates: BTreeMap<String, String>,
    pub resolved_intent: Option<Intent>,
    /// Raw route target as emitted by the model; compared against
    /// `resolved_intent` by the gate.
    pub route_target: Option<String>,
    pub intent_evidence: Vec<String>,
    pub missing_required_slots: Vec<SlotKey>,
    pub trace: Vec<String>,
    pub messages: Vec<ChatMessage>,
}

/// Terminal output of the clarify gate.
#[derive(Debug, Clone)]
pub struct GateResult {
    pub decision: GateDecision,
    pub payload: HybridAnswerRequest,
    pub clarify_reason: Option<String>,
    pub clarify_error: Option<String>,
    pub trace: Vec<String>,
    pub clarify_messages: Option<Vec<ChatMessage>>,
}

impl GateResult {
    pub fn is_continue(&self) -> bool {
        self.decision == GateDecision::ContinueBusiness
    }
}
