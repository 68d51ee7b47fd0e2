//! Turn-level resolver facade and debug entry points

use std::collections::BTreeMap;
use std::sync::Arc;

use parkassist_core::{
    ChatMessage, ChatModel, ClarifyTool, GateDecision, HybridAnswerRequest, Intent, SessionState,
    SlotKey,
};

use crate::agent::ReActClarifyAgent;
use crate::gate::ReactClarifyGate;
use crate::hydrator::SlotHydrator;
use crate::parser::IntentSlotParser;
use crate::types::{GateResult, IntentSlotParseResult};

pub const DEFAULT_MAX_ROUNDS: usize = 3;

/// Resolver output driving the rest of the turn: either continue into the
/// business workflow, or a terminal clarification.
#[derive(Debug, Clone)]
pub struct ResolvedTurnContext {
    pub payload: HybridAnswerRequest,
    pub decision: GateDecision,
    pub trace: Vec<String>,
    pub clarify_reason: Option<String>,
    pub clarify_error: Option<String>,
    pub clarify_messages: Option<Vec<ChatMessage>>,
}

/// Output of the clarify-react debug entry point.
#[derive(Debug, Clone)]
pub struct ClarifyReactDebugResult {
    pub decision: GateDecision,
    pub intent: Option<Intent>,
    pub clarify_question: Option<String>,
    pub clarify_error: Option<String>,
    pub resolved_slots: BTreeMap<String, String>,
    pub missing_required_slots: Vec<SlotKey>,
    pub trace: Vec<String>,
    pub messages: Vec<ChatMessage>,
    pub parsed_payload: HybridAnswerRequest,
}

/// Wires the three resolver stages together for one turn.
pub struct TurnResolver {
    parser: IntentSlotParser,
    agent: Option<ReActClarifyAgent>,
    max_rounds: usize,
}

impl TurnResolver {
    pub fn new(llm: Option<Arc<dyn ChatModel>>, tools: Vec<Arc<dyn ClarifyTool>>) -> Self {
        let agent = llm
            .clone()
            .map(|llm| ReActClarifyAgent::new(llm, tools));
        Self {
            parser: IntentSlotParser::new(llm),
            agent,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    async fn run_gate(
        &self,
        payload: &HybridAnswerRequest,
        memory: Option<&SessionState>,
        required_slots_override: Option<Vec<SlotKey>>,
        max_rounds: usize,
    ) -> (IntentSlotParseResult, GateResult) {
        let parse_result = self.parser.parse(payload).await;
        let hydrate_result = SlotHydrator::hydrate(&parse_result, memory);
        let gate_result = ReactClarifyGate::new(self.agent.as_ref())
            .decide(
                &parse_result,
                &hydrate_result,
                memory,
                required_slots_override,
                max_rounds,
            )
            .await;

        let mut trace = parse_result.trace.clone();
        trace.extend(hydrate_result.trace.iter().cloned());
        trace.extend(gate_result.trace.iter().cloned());
        let gate_result = GateResult {
            trace,
            ..gate_result
        };
        (parse_result, gate_result)
    }

    /// Full resolver pipeline for one turn.
    pub async fn resolve(
        &self,
        payload: &HybridAnswerRequest,
        memory: Option<&SessionState>,
    ) -> ResolvedTurnContext {
        let (_, gate_result) = self
            .run_gate(payload, memory, None, self.max_rounds)
            .await;
        ResolvedTurnContext {
            payload: gate_result.payload,
            decision: gate_result.decision,
            trace: gate_result.trace,
            clarify_reason: gate_result.clarify_reason,
            clarify_error: gate_result.clarify_error,
            clarify_messages: gate_result.clarify_messages,
        }
    }

    /// Debug: run only stage 1.
    pub async fn debug_intent_slot_parse(
        &self,
        payload: &HybridAnswerRequest,
    ) -> IntentSlotParseResult {
        self.parser.parse(payload).await
    }

    /// Debug: run the full pipeline with optional required-slot override and
    /// round budget, exposing the resolved slot snapshot.
    pub async fn debug_clarify_react(
        &self,
        payload: &HybridAnswerRequest,
        memory: Option<&SessionState>,
        required_slots: Option<Vec<SlotKey>>,
        max_rounds: usize,
    ) -> ClarifyReactDebugResult {
        let required_override = required_slots.clone();
        let (parse_result, gate_result) = self
            .run_gate(payload, memory, required_override, max_rounds.max(1))
            .await;

        let resolved_slots: BTreeMap<String, String> = SlotKey::ALL
            .iter()
            .filter_map(|key| {
                gate_result
                    .payload
                    .slot(*key)
                    .map(|value| (key.as_str().to_string(), value.to_string()))
            })
            .collect();

        let required = required_slots.unwrap_or_else(|| {
            parse_result
                .intent
                .map(|intent| intent.required_slots().to_vec())
                .unwrap_or_default()
        });
        let missing_required_slots = required
            .into_iter()
            .filter(|key| gate_result.payload.slot(*key).is_none())
            .collect();

        ClarifyReactDebugResult {
            decision: gate_result.decision,
            intent: parse_result.intent,
            clarify_question: gate_result.clarify_reason,
            clarify_error: gate_result.clarify_error,
            resolved_slots,
            missing_required_slots,
            trace: gate_result.trace,
            messages: gate_result.clarify_messages.unwrap_or_default(),
            parsed_payload: gate_result.payload,
        }
    }
}
