//! Stage 3: the clarify gate, the single authority on how a turn leaves
//! the resolver

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, warn};

use parkassist_core::{
    ChatMessage, GateDecision, HybridAnswerRequest, Role, SessionState, SlotKey,
};

use crate::agent::{ClarifyTask, ReActClarifyAgent};
use crate::types::{ClarifyResult, GateResult, IntentSlotParseResult, SlotHydrateResult};

const MSG_MISSING_ORDER_NO: &str = "请提供要核验的订单号（order_no，例如 SCN-020）。";
const MSG_MISSING_PLATE_NO: &str = "请提供要查询欠费的车牌号（plate_no，例如 沪A12345）。";
const MSG_MISSING_REQUIRED: &str = "请补充必要信息后继续。";
const MSG_CLARIFY_FALLBACK: &str = "当前澄清流程暂不可用，请补充必要信息后继续。";
const MSG_PENDING_INTENT: &str = "请先确认你的问题类型：规则解释、欠费查询，还是订单金额核验？";
const MSG_ABORT: &str = "当前信息仍不足以继续，请补充关键信息后重试。";

/// Decision policy, evaluated top-down:
/// 1. intent known, nothing missing → continue.
/// 2. intent known, required slots missing → deterministic short-circuit.
/// 3. intent unknown → one ReAct invocation, normalized below.
pub struct ReactClarifyGate<'a> {
    agent: Option<&'a ReActClarifyAgent>,
}

impl<'a> ReactClarifyGate<'a> {
    pub fn new(agent: Option<&'a ReActClarifyAgent>) -> Self {
        Self { agent }
    }

    pub async fn decide(
        &self,
        parse_result: &IntentSlotParseResult,
        hydrate_result: &SlotHydrateResult,
        memory: Option<&SessionState>,
        required_slots_override: Option<Vec<SlotKey>>,
        max_rounds: usize,
    ) -> GateResult {
        let mut trace: Vec<String> = Vec::new();

        if parse_result.intent.is_some() && hydrate_result.missing_required_slots.is_empty() {
            return GateResult {
                decision: GateDecision::ContinueBusiness,
                payload: hydrate_result.payload.clone(),
                clarify_reason: None,
                clarify_error: None,
                trace: vec!["react_clarify_gate:pass".to_string()],
                clarify_messages: None,
            };
        }

        if parse_result.intent.is_some() {
            trace.push("react_clarify_gate:need_react:missing_required_slots".to_string());
            return Self::short_circuit(hydrate_result, trace);
        }

        trace.push("react_clarify_gate:need_react:missing_intent".to_string());
        trace.push("react_clarify_gate:enter_react".to_string());

        let required_slots = required_slots_override.unwrap_or_else(|| {
            parse_result
                .intent
                .map(|intent| intent.required_slots().to_vec())
                .unwrap_or_default()
        });

        let Some(agent) = self.agent else {
            warn!("clarify agent unavailable, degrading to short-circuit");
            return Self::fallback(hydrate_result, trace);
        };

        let react_result = match agent
            .run(ClarifyTask {
                payload: &hydrate_result.payload,
                required_slots,
                memory,
                max_rounds,
            })
            .await
        {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, "clarify agent failed, degrading to short-circuit");
                return Self::fallback(hydrate_result, trace);
            }
        };

        Self::normalize(hydrate_result, trace, react_result)
    }

    fn short_circuit(hydrate_result: &SlotHydrateResult, mut trace: Vec<String>) -> GateResult {
        let missing = &hydrate_result.missing_required_slots;
        let (reason, error, tag) = if missing.contains(&SlotKey::OrderNo) {
            (
                MSG_MISSING_ORDER_NO,
                "missing_order_no",
                "react_clarify_gate:short_circuit:missing_order_no",
            )
        } else if missing.contains(&SlotKey::PlateNo) {
            (
                MSG_MISSING_PLATE_NO,
                "missing_plate_no",
                "react_clarify_gate:short_circuit:missing_plate_no",
            )
        } else {
            (
                MSG_MISSING_REQUIRED,
                "missing_required_slots",
                "react_clarify_gate:short_circuit:missing_required_slots",
            )
        };
        trace.push(tag.to_string());
        info!(error, "gate short_circuit");
        GateResult {
            decision: GateDecision::ClarifyShortCircuit,
            payload: hydrate_result.payload.clone(),
            clarify_reason: Some(reason.to_string()),
            clarify_error: Some(error.to_string()),
            trace,
            clarify_messages: None,
        }
    }

    fn fallback(hydrate_result: &SlotHydrateResult, mut trace: Vec<String>) -> GateResult {
        trace.push("react_clarify_gate:fallback:react_error".to_string());
        GateResult {
            decision: GateDecision::ClarifyShortCircuit,
            payload: hydrate_result.payload.clone(),
            clarify_reason: Some(MSG_CLARIFY_FALLBACK.to_string()),
            clarify_error: Some("clarify_fallback".to_string()),
            trace,
            clarify_messages: None,
        }
    }

    /// Scan tool messages for `{tool, hit}` payloads and record hit/miss
    /// trace flags for the two introspection tools.
    fn tool_hit_flags(messages: &[ChatMessage]) -> Vec<String> {
        let mut lookup_order_hit: Option<bool> = None;
        let mut billing_rule_hit: Option<bool> = None;
        for message in messages {
            if message.role != Role::Tool || message.content.trim().is_empty() {
                continue;
            }
            let Ok(Value::Object(payload)) = serde_json::from_str(&message.content) else {
                continue;
            };
            let Some(hit) = payload.get("hit").and_then(Value::as_bool) else {
                continue;
            };
            match payload.get("tool").and_then(Value::as_str) {
                Some("lookup_order") => lookup_order_hit = Some(hit),
                Some("query_billing_rules_by_params") => billing_rule_hit = Some(hit),
                _ => {}
            }
        }

        let mut flags = Vec::new();
        if let Some(hit) = lookup_order_hit {
            flags.push(format!(
                "react_clarify_gate:{}:lookup_order",
                if hit { "tool_hit" } else { "tool_miss" }
            ));
        }
        if let Some(hit) = billing_rule_hit {
            flags.push(format!(
                "react_clarify_gate:{}:query_billing_rules_by_params",
                if hit { "tool_hit" } else { "tool_miss" }
            ));
        }
        flags
    }

    fn merge_payload(
        payload: &HybridAnswerRequest,
        resolved_slots: &BTreeMap<String, String>,
    ) -> HybridAnswerRequest {
        let mut merged = payload.clone();
        for (key, value) in resolved_slots {
            if let Some(key) = SlotKey::parse(key) {
                merged.set_slot(key, value.clone());
            }
        }
        merged
    }

    fn normalize(
        hydrate_result: &SlotHydrateResult,
        mut trace: Vec<String>,
        react_result: ClarifyResult,
    ) -> GateResult {
        trace.extend(react_result.trace.iter().cloned());
        trace.extend(Self::tool_hit_flags(&react_result.messages));

        let merged_payload =
            Self::merge_payload(&hydrate_result.payload, &react_result.resolved_slots);
        let messages = Some(react_result.messages);

        if react_result.decision == GateDecision::ContinueBusiness {
            let Some(resolved_intent) = react_result.resolved_intent else {
                trace.push("react_clarify_gate:pending_intent".to_string());
                return GateResult {
                    decision: GateDecision::ClarifyReact,
                    payload: merged_payload,
                    clarify_reason: Some(
                        react_result
                            .clarify_question
                            .unwrap_or_else(|| MSG_PENDING_INTENT.to_string()),
                    ),
                    clarify_error: Some("missing_intent".to_string()),
                    trace,
                    clarify_messages: messages,
                };
            };

            if let Some(route_target) = &react_result.route_target {
                if route_target != resolved_intent.as_str() {
                    trace.push("react_clarify_gate:intent_route_mismatch".to_string());
                    return GateResult {
                        decision: GateDecision::ClarifyReact,
                        payload: merged_payload,
                        clarify_reason: Some(
                            react_result
                                .clarify_question
                                .unwrap_or_else(|| MSG_PENDING_INTENT.to_string()),
                        ),
                        clarify_error: Some("intent_route_mismatch".to_string()),
                        trace,
                        clarify_messages: messages,
                    };
                }
            }

            let still_missing = merged_payload.missing_required_slots(Some(resolved_intent));
            if still_missing.is_empty() {
                let mut continued = merged_payload;
                continued.intent_hint = Some(resolved_intent.as_str().to_string());
                trace.push("react_clarify_gate:continue_business".to_string());
                return GateResult {
                    decision: GateDecision::ContinueBusiness,
                    payload: continued,
                    clarify_reason: None,
                    clarify_error: None,
                    trace,
                    clarify_messages: messages,
                };
            }

            trace.push("react_clarify_gate:clarify_react".to_string());
            return GateResult {
                decision: GateDecision::ClarifyReact,
                payload: merged_payload,
                clarify_reason: Some(
                    react_result
                        .clarify_question
                        .unwrap_or_else(|| MSG_MISSING_REQUIRED.to_string()),
                ),
                clarify_error: Some("clarify_react_required".to_string()),
                trace,
                clarify_messages: messages,
            };
        }

        if react_result.decision == GateDecision::ClarifyAbort {
            trace.push("react_clarify_gate:abort".to_string());
            return GateResult {
                decision: GateDecision::ClarifyAbort,
                payload: merged_payload,
                clarify_reason: Some(
                    react_result
                        .clarify_question
                        .unwrap_or_else(|| MSG_ABORT.to_string()),
                ),
                clarify_error: Some("clarify_abort".to_string()),
                trace,
                clarify_messages: messages,
            };
        }

        trace.push("react_clarify_gate:clarify_react".to_string());
        GateResult {
            decision: GateDecision::ClarifyReact,
            payload: merged_payload,
            clarify_reason: Some(
                react_result
                    .clarify_question
                    .unwrap_or_else(|| MSG_MISSING_REQUIRED.to_string()),
            ),
            clarify_error: Some("clarify_react_required".to_string()),
            trace,
            clarify_messages: messages,
        }
    }
}
