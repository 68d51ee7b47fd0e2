//! Stage 1: intent and slot parsing

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{info, warn};

use parkassist_core::{
    ChatMessage, ChatModel, CompletionOptions, FieldSource, HybridAnswerRequest, Intent, SlotKey,
};

use crate::json::parse_json_object;
use crate::types::IntentSlotParseResult;

const ORDER_REF_TOKENS: [&str; 5] = ["上一单", "上一笔", "这笔", "这单", "第一笔"];
const PARSE_TIMEOUT_SECS: u64 = 8;

const PARSE_SYSTEM_PROMPT: &str = "你是停车业务意图和槽位解析器。\
请只输出JSON，格式: {\"intent\":\"rule_explain|arrears_check|fee_verify|unknown\",\
\"intent_confidence\":0~1,\"slots\":{\"order_no\":string|null,\"plate_no\":string|null,\
\"city_code\":string|null,\"lot_code\":string|null},\"ambiguities\":[string,...]}。";

fn order_no_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\bSCN-\d+\b").expect("valid pattern"))
}

fn extract_order_no_from_query(query: &str) -> Option<String> {
    order_no_pattern()
        .find(query)
        .map(|m| m.as_str().to_uppercase())
}

fn wants_order_reference(query: &str) -> bool {
    ORDER_REF_TOKENS.iter().any(|token| query.contains(token))
}

fn build_field_sources(payload: &HybridAnswerRequest) -> HashMap<SlotKey, FieldSource> {
    SlotKey::ALL
        .iter()
        .filter(|key| payload.slot(**key).is_some())
        .map(|key| (*key, FieldSource::User))
        .collect()
}

/// Two-phase parser: a deterministic pass, then one LLM call when the
/// deterministic pass could not settle the intent. With no model configured
/// the deterministic result stands alone.
pub struct IntentSlotParser {
    llm: Option<Arc<dyn ChatModel>>,
    llm_timeout: Duration,
}

impl IntentSlotParser {
    pub fn new(llm: Option<Arc<dyn ChatModel>>) -> Self {
        Self {
            llm,
            llm_timeout: Duration::from_secs(PARSE_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    fn parse_deterministic(payload: &HybridAnswerRequest) -> IntentSlotParseResult {
        let mut trace = vec!["intent_slot_parse:deterministic".to_string()];
        let mut field_sources = build_field_sources(payload);
        let mut parsed = payload.clone();

        let intent = payload.hinted_intent();
        let intent_confidence = intent.map(|_| 1.0);

        if parsed.order_no.is_none() {
            if let Some(order_no) = extract_order_no_from_query(&parsed.query) {
                parsed.set_slot(SlotKey::OrderNo, order_no);
                field_sources.insert(SlotKey::OrderNo, FieldSource::Inferred);
                trace.push("intent_slot_parse:order_no_from_query".to_string());
            }
        }

        let mut ambiguities = Vec::new();
        if parsed.order_no.is_none() && wants_order_reference(&parsed.query) {
            ambiguities.push("order_reference".to_string());
            trace.push("intent_slot_parse:order_reference".to_string());
        }

        let missing_required_slots = parsed.missing_required_slots(intent);
        IntentSlotParseResult {
            payload: parsed,
            intent,
            intent_confidence,
            field_sources,
            missing_required_slots,
            ambiguities,
            trace,
        }
    }

    pub async fn parse(&self, payload: &HybridAnswerRequest) -> IntentSlotParseResult {
        let deterministic = Self::parse_deterministic(payload);
        if deterministic.intent.is_some() {
            return deterministic;
        }
        let Some(llm) = &self.llm else {
            return deterministic;
        };

        let messages = vec![
            ChatMessage::system(PARSE_SYSTEM_PROMPT),
            ChatMessage::user(format!("用户问题: {}", payload.query)),
        ];
        let options = CompletionOptions::default().with_timeout(self.llm_timeout);

        info!(
            query_len = payload.query.chars().count(),
            hint = payload.intent_hint.as_deref().unwrap_or(""),
            model = llm.model_id(),
            "llm[intent_slot_parse] input"
        );

        let response = match llm.complete(&messages, &options).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "intent_slot_parse llm_error fallback=deterministic");
                return Self::with_trace_tag(deterministic, "intent_slot_parse:llm_error_fallback");
            }
        };

        let Some(parsed) = parse_json_object(&response.content) else {
            info!("llm[intent_slot_parse] parse_result=invalid_json fallback=deterministic");
            return Self::with_trace_tag(
                deterministic,
                "intent_slot_parse:llm_invalid_json_fallback",
            );
        };

        Self::merge_llm_result(deterministic, &parsed)
    }

    fn with_trace_tag(mut result: IntentSlotParseResult, tag: &str) -> IntentSlotParseResult {
        result.trace.push(tag.to_string());
        result
    }

    fn merge_llm_result(
        deterministic: IntentSlotParseResult,
        parsed: &serde_json::Map<String, Value>,
    ) -> IntentSlotParseResult {
        let llm_intent = parsed
            .get("intent")
            .and_then(Value::as_str)
            .and_then(Intent::parse);
        let intent = llm_intent.or(deterministic.intent);

        let intent_confidence = parsed
            .get("intent_confidence")
            .and_then(Value::as_f64)
            .or(deterministic.intent_confidence);

        let mut payload = deterministic.payload.clone();
        let mut field_sources = deterministic.field_sources.clone();
        if let Some(Value::Object(slots)) = parsed.get("slots") {
            for key in SlotKey::ALL {
                if payload.slot(key).is_some() {
                    continue;
                }
                if let Some(value) = slots
                    .get(key.as_str())
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                {
                    payload.set_slot(key, value);
                    field_sources.insert(key, FieldSource::Inferred);
                }
            }
        }

        let mut ambiguities = deterministic.ambiguities.clone();
        if let Some(Value::Array(labels)) = parsed.get("ambiguities") {
            for label in labels {
                if let Some(label) = label.as_str().map(str::trim).filter(|l| !l.is_empty()) {
                    if !ambiguities.iter().any(|existing| existing == label) {
                        ambiguities.push(label.to_string());
                    }
                }
            }
        }

        let missing_required_slots = payload.missing_required_slots(intent);
        info!(
            intent = intent.map(|i| i.as_str()).unwrap_or("unknown"),
            missing = missing_required_slots.len(),
            ambiguities = ambiguities.len(),
            "llm[intent_slot_parse] parse_result=json"
        );

        let mut trace = deterministic.trace;
        trace.push("intent_slot_parse:llm".to_string());
        IntentSlotParseResult {
            payload,
            intent,
            intent_confidence,
            field_sources,
            missing_required_slots,
            ambiguities,
            trace,
        }
    }
}
