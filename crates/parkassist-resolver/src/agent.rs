//! ReAct clarify sub-agent: a bounded tool loop over the chat model

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use parkassist_core::{
    ChatMessage, ChatModel, ChatModelError, ClarifyTool, CompletionOptions, GateDecision,
    HybridAnswerRequest, Intent, Role, SessionState, SlotKey, ToolSpec,
};

use crate::json::parse_json_object;
use crate::types::ClarifyResult;

pub const CLARIFY_SYSTEM_PROMPT: &str = "你是停车业务澄清助手。\
目标是最短路径补齐业务必填槽位并消除歧义。\
当用户参数可能同时代表订单或停车场时，先调用 lookup_order 再调用 \
query_billing_rules_by_params，之后再判断。\
最终回复必须是单个 JSON 对象，且只能包含 JSON，禁止输出任何额外说明、前后缀或 Markdown。\
仅输出JSON: {\"action\":\"ask_user|finish_clarify|abort\",\
\"clarify_question\":string|null,\"slot_updates\":object,\
\"resolved_intent\":\"rule_explain|arrears_check|fee_verify\"|null,\
\"route_target\":string|null,\"intent_evidence\":[string,...],\"reason\":string|null}。";

pub const DEFAULT_ASK_QUESTION: &str = "请补充关键信息后继续，例如订单号 SCN-020 或车牌号。";
const FALLBACK_QUESTION: &str = "请补充必要信息后继续。";
const CLARIFY_TIMEOUT_SECS: u64 = 8;

#[derive(Debug, Error)]
pub enum ClarifyAgentError {
    #[error("clarify model error: {0}")]
    Model(#[from] ChatModelError),
}

/// One clarify invocation: the hydrated turn plus the slots it must settle.
pub struct ClarifyTask<'a> {
    pub payload: &'a HybridAnswerRequest,
    pub required_slots: Vec<SlotKey>,
    pub memory: Option<&'a SessionState>,
    pub max_rounds: usize,
}

/// Minimal ReAct loop: tool results are appended as messages; the loop stops
/// when the model emits a final action or the round budget runs out. The
/// hard step limit is `max(4, 2 * max_rounds)`.
pub struct ReActClarifyAgent {
    llm: Arc<dyn ChatModel>,
    tools: Vec<Arc<dyn ClarifyTool>>,
    llm_timeout: Duration,
}

impl ReActClarifyAgent {
    pub fn new(llm: Arc<dyn ChatModel>, tools: Vec<Arc<dyn ClarifyTool>>) -> Self {
        Self {
            llm,
            tools,
            llm_timeout: Duration::from_secs(CLARIFY_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    fn tool_specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }

    fn load_history(memory: Option<&SessionState>) -> Vec<ChatMessage> {
        memory
            .map(|state| {
                state
                    .clarify_messages
                    .iter()
                    .filter(|message| message.role != Role::System)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn seed_slots(payload: &HybridAnswerRequest) -> BTreeMap<String, String> {
        SlotKey::ALL
            .iter()
            .filter_map(|key| {
                payload
                    .slot(*key)
                    .map(|value| (key.as_str().to_string(), value.to_string()))
            })
            .collect()
    }

    fn missing_slots(
        required_slots: &[SlotKey],
        resolved_slots: &BTreeMap<String, String>,
    ) -> Vec<SlotKey> {
        required_slots
            .iter()
            .copied()
            .filter(|key| {
                resolved_slots
                    .get(key.as_str())
                    .map(|value| value.trim().is_empty())
                    .unwrap_or(true)
            })
            .collect()
    }

    async fn run_tool(&self, name: &str, args: Value) -> Value {
        match self.tools.iter().find(|tool| tool.name() == name) {
            Some(tool) => tool.invoke(args).await.payload,
            None => {
                warn!(tool = name, "clarify agent asked for unknown tool");
                serde_json::json!({"tool": name, "hit": false, "reason": "unknown_tool"})
            }
        }
    }

    pub async fn run(&self, task: ClarifyTask<'_>) -> Result<ClarifyResult, ClarifyAgentError> {
        let history = Self::load_history(task.memory);
        info!(
            required_slots = task.required_slots.len(),
            max_rounds = task.max_rounds,
            history_messages = history.len(),
            "clarify_react input"
        );

        let mut conversation = history;
        conversation.push(ChatMessage::user(task.payload.query.clone()));

        let resolved_slots = Self::seed_slots(task.payload);
        let mut trace = vec!["clarify_react:start".to_string()];

        let options = CompletionOptions::default()
            .with_timeout(self.llm_timeout)
            .with_tools(self.tool_specs());

        let max_rounds = task.max_rounds.max(1);
        let step_limit = (2 * max_rounds).max(4);
        let mut rounds = 0usize;
        let mut steps = 0usize;

        while rounds < max_rounds && steps < step_limit {
            let mut messages = Vec::with_capacity(conversation.len() + 1);
            messages.push(ChatMessage::system(CLARIFY_SYSTEM_PROMPT));
            messages.extend(conversation.iter().cloned());

            let response = self.llm.complete(&messages, &options).await?;
            rounds += 1;
            steps += 1;

            if response.has_tool_calls() {
                let tool_calls = response.tool_calls.clone();
                conversation.push(ChatMessage::assistant_with_tool_calls(
                    response.content,
                    tool_calls.clone(),
                ));
                steps += 1;
                for call in tool_calls {
                    trace.push(format!("clarify_react:tool:{}", call.name));
                    let outcome = self.run_tool(&call.name, call.arguments).await;
                    conversation.push(ChatMessage::tool(call.id, outcome.to_string()));
                }
                continue;
            }

            conversation.push(ChatMessage::assistant(response.content.clone()));
            return Ok(self.finalize(
                &response.content,
                task.required_slots,
                resolved_slots,
                trace,
                conversation,
            ));
        }

        // Round budget exhausted without a final action.
        trace.push("clarify_react:max_rounds".to_string());
        trace.push("clarify_react:agent:ask_user".to_string());
        let missing_required_slots = Self::missing_slots(&task.required_slots, &resolved_slots);
        Ok(ClarifyResult {
            decision: GateDecision::ClarifyReact,
            clarify_question: Some(DEFAULT_ASK_QUESTION.to_string()),
            resolved_slots,
            slot_updates: BTreeMap::new(),
            resolved_intent: None,
            route_target: None,
            intent_evidence: Vec::new(),
            missing_required_slots,
            trace,
            messages: conversation,
        })
    }

    fn finalize(
        &self,
        content: &str,
        required_slots: Vec<SlotKey>,
        mut resolved_slots: BTreeMap<String, String>,
        mut trace: Vec<String>,
        messages: Vec<ChatMessage>,
    ) -> ClarifyResult {
        let Some(parsed) = parse_json_object(content) else {
            let question = content.trim();
            trace.push("clarify_react:parse:fallback_ask_user".to_string());
            trace.push("clarify_react:agent:ask_user".to_string());
            let missing_required_slots = Self::missing_slots(&required_slots, &resolved_slots);
            return ClarifyResult {
                decision: GateDecision::ClarifyReact,
                clarify_question: Some(if question.is_empty() {
                    FALLBACK_QUESTION.to_string()
                } else {
                    question.to_string()
                }),
                resolved_slots,
                slot_updates: BTreeMap::new(),
                resolved_intent: None,
                route_target: None,
                intent_evidence: Vec::new(),
                missing_required_slots,
                trace,
                messages,
            };
        };

        let mut slot_updates = BTreeMap::new();
        if let Some(Value::Object(updates)) = parsed.get("slot_updates") {
            for (key, value) in updates {
                if let Some(value) = value.as_str().map(str::trim).filter(|v| !v.is_empty()) {
                    slot_updates.insert(key.clone(), value.to_string());
                    resolved_slots.insert(key.clone(), value.to_string());
                }
            }
        }

        let missing_required_slots = Self::missing_slots(&required_slots, &resolved_slots);

        let mut action = parsed
            .get("action")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|action| matches!(*action, "ask_user" | "finish_clarify" | "abort"))
            .unwrap_or("ask_user");
        if action == "finish_clarify" && !missing_required_slots.is_empty() {
            action = "ask_user";
        }

        let decision = match action {
            "finish_clarify" => GateDecision::ContinueBusiness,
            "abort" => GateDecision::ClarifyAbort,
            _ => GateDecision::ClarifyReact,
        };
        trace.push(format!("clarify_react:agent:{action}"));

        let mut clarify_question = parsed
            .get("clarify_question")
            .and_then(Value::as_str)
            .map(str::to_string);
        if action == "ask_user" && clarify_question.as_deref().unwrap_or("").trim().is_empty() {
            clarify_question = Some(DEFAULT_ASK_QUESTION.to_string());
        }

        let resolved_intent = parsed
            .get("resolved_intent")
            .and_then(Value::as_str)
            .and_then(Intent::parse);
        let route_target = parsed
            .get("route_target")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|target| !target.is_empty())
            .map(str::to_string);
        let intent_evidence = parsed
            .get("intent_evidence")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str())
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        info!(
            action,
            decision = decision.as_str(),
            slot_updates = slot_updates.len(),
            missing = missing_required_slots.len(),
            "clarify_react result"
        );

        ClarifyResult {
            decision,
            clarify_question,
            resolved_slots,
            slot_updates,
            resolved_intent,
            route_target,
            intent_evidence,
            missing_required_slots,
            trace,
            messages,
        }
    }
}
