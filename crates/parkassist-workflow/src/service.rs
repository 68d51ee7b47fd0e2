//! Per-turn orchestration: memory read → resolver → workflow → memory write

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use parkassist_core::{
    new_trace_id, AnswerCitation, CoreError, HybridAnswerRequest, HybridAnswerResponse,
    PendingClarification, SessionState, SessionStore, SlotKey, TurnRecord,
};
use parkassist_resolver::{ClarifyReactDebugResult, IntentSlotParseResult, ResolvedTurnContext, TurnResolver};

use crate::workflow::{HybridWorkflow, HybridWorkflowState, WorkflowError};

/// Bounds for session memory writes.
#[derive(Debug, Clone)]
pub struct MemoryPolicy {
    pub ttl: Duration,
    pub max_turns: usize,
    pub max_clarify_messages: usize,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(1800),
            max_turns: 20,
            max_clarify_messages: 40,
        }
    }
}

/// One-stop service for the hybrid answer turn. Memory is read once at
/// entry and written once at exit; the resolver sees it as a value.
pub struct HybridAnswerService {
    resolver: TurnResolver,
    workflow: HybridWorkflow,
    session_store: Arc<dyn SessionStore>,
    memory_policy: MemoryPolicy,
}

impl HybridAnswerService {
    pub fn new(
        resolver: TurnResolver,
        workflow: HybridWorkflow,
        session_store: Arc<dyn SessionStore>,
        memory_policy: MemoryPolicy,
    ) -> Self {
        Self {
            resolver,
            workflow,
            session_store,
            memory_policy,
        }
    }

    pub async fn answer(
        &self,
        request: &HybridAnswerRequest,
    ) -> Result<HybridAnswerResponse, CoreError> {
        request.validate()?;

        let mut payload = request.clone();
        let turn_id = payload
            .turn_id
            .clone()
            .filter(|turn_id| !turn_id.trim().is_empty())
            .unwrap_or_else(new_trace_id);
        payload.turn_id = Some(turn_id.clone());

        let memory = self.read_memory(payload.session_id.as_deref()).await;

        info!(
            session_id = payload.session_id.as_deref().unwrap_or(""),
            turn_id = %turn_id,
            query_len = payload.query.chars().count(),
            hint = payload.intent_hint.as_deref().unwrap_or(""),
            "hybrid start"
        );

        let resolved = self.resolver.resolve(&payload, memory.as_ref()).await;

        if resolved.decision.is_clarifying() {
            let response = self.clarify_response(&turn_id, &resolved);
            self.persist_clarification(&resolved, &turn_id, memory).await;
            return Ok(response);
        }

        let intent = resolved.payload.hinted_intent();
        let state = match self.workflow.run(&resolved.payload, intent).await {
            Ok(state) => state,
            Err(WorkflowError::Retrieve(err)) => return Err(CoreError::KnowledgeStore(err.to_string())),
            Err(WorkflowError::Synthesize(err)) => return Err(CoreError::Llm(err.to_string())),
        };

        let mut graph_trace = resolved.trace.clone();
        graph_trace.extend(state.trace.tags().iter().cloned());
        if resolved.payload.session_id.is_some() {
            graph_trace.push("memory_persist".to_string());
        }
        self.persist_business_turn(&resolved.payload, &state, &turn_id, memory)
            .await;

        let citations: Vec<AnswerCitation> = state
            .retrieved_items
            .iter()
            .map(AnswerCitation::from_chunk)
            .collect();

        Ok(HybridAnswerResponse {
            session_id: resolved.payload.session_id.clone(),
            turn_id,
            memory_ttl_seconds: self.memory_policy.ttl.as_secs(),
            intent: state
                .intent
                .map(|intent| intent.as_str().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            conclusion: state.conclusion,
            key_points: state.key_points,
            business_facts: state.business_facts,
            citations,
            retrieved_count: state.retrieved_items.len(),
            model: state.model,
            graph_trace,
        })
    }

    /// Debug entry: resolver stage 1 only (stage 1 runs pre-hydration, so
    /// memory is not consulted).
    pub async fn debug_intent_slot_parse(
        &self,
        request: &HybridAnswerRequest,
    ) -> Result<IntentSlotParseResult, CoreError> {
        request.validate()?;
        Ok(self.resolver.debug_intent_slot_parse(request).await)
    }

    /// Debug entry: full resolver with overrides, no workflow execution.
    pub async fn debug_clarify_react(
        &self,
        request: &HybridAnswerRequest,
        required_slots: Option<Vec<SlotKey>>,
        max_rounds: usize,
    ) -> Result<ClarifyReactDebugResult, CoreError> {
        request.validate()?;
        let memory = self.read_memory(request.session_id.as_deref()).await;
        Ok(self
            .resolver
            .debug_clarify_react(request, memory.as_ref(), required_slots, max_rounds)
            .await)
    }

    async fn read_memory(&self, session_id: Option<&str>) -> Option<SessionState> {
        let session_id = session_id?.trim();
        if session_id.is_empty() {
            return None;
        }
        match self.session_store.get(session_id).await {
            Ok(state) => state,
            Err(err) => {
                warn!(session_id, error = %err, "session read failed, continuing without memory");
                None
            }
        }
    }

    fn clarify_response(
        &self,
        turn_id: &str,
        resolved: &ResolvedTurnContext,
    ) -> HybridAnswerResponse {
        let intent = resolved
            .payload
            .hinted_intent()
            .map(|intent| intent.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let mut facts = serde_json::Map::new();
        facts.insert("intent".to_string(), Value::String(intent.clone()));
        if let Some(error) = &resolved.clarify_error {
            facts.insert("error".to_string(), Value::String(error.clone()));
        }

        HybridAnswerResponse {
            session_id: resolved.payload.session_id.clone(),
            turn_id: turn_id.to_string(),
            memory_ttl_seconds: self.memory_policy.ttl.as_secs(),
            intent,
            conclusion: resolved
                .clarify_reason
                .clone()
                .unwrap_or_else(|| "请补充必要信息后继续。".to_string()),
            key_points: Vec::new(),
            business_facts: Value::Object(facts),
            citations: Vec::new(),
            retrieved_count: 0,
            model: String::new(),
            graph_trace: resolved.trace.clone(),
        }
    }

    fn refresh_slots_from_payload(state: &mut SessionState, payload: &HybridAnswerRequest) {
        for key in SlotKey::ALL {
            if let Some(value) = payload.slot(key) {
                state.slots.set(key, value);
            }
        }
        if let Some(at_time) = payload.at_time {
            state.slots.at_time = Some(at_time);
        }
    }

    fn refresh_slots_from_facts(state: &mut SessionState, facts: &Value) {
        for key in [SlotKey::OrderNo, SlotKey::PlateNo, SlotKey::CityCode] {
            if let Some(value) = facts
                .get(key.as_str())
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
            {
                state.slots.set(key, value);
            }
        }
    }

    async fn persist_clarification(
        &self,
        resolved: &ResolvedTurnContext,
        turn_id: &str,
        previous: Option<SessionState>,
    ) {
        let Some(session_id) = resolved
            .payload
            .session_id
            .as_deref()
            .map(str::trim)
            .filter(|session_id| !session_id.is_empty())
        else {
            return;
        };

        let mut state = previous.unwrap_or_default();
        Self::refresh_slots_from_payload(&mut state, &resolved.payload);

        state.pending_clarification = Some(PendingClarification {
            decision: resolved.decision,
            error: resolved.clarify_error.clone(),
        });
        if let Some(messages) = &resolved.clarify_messages {
            state.set_clarify_messages(messages.clone(), self.memory_policy.max_clarify_messages);
        }
        state.resolved_slots = Some(
            SlotKey::ALL
                .iter()
                .filter_map(|key| {
                    resolved
                        .payload
                        .slot(*key)
                        .map(|value| (key.as_str().to_string(), value.to_string()))
                })
                .collect(),
        );
        state.push_turn(
            TurnRecord {
                turn_id: turn_id.to_string(),
                query: resolved.payload.query.clone(),
                intent: resolved
                    .payload
                    .hinted_intent()
                    .map(|intent| intent.as_str().to_string()),
                order_no: state.slots.order_no.clone(),
            },
            self.memory_policy.max_turns,
        );

        self.write_memory(session_id, state).await;
    }

    async fn persist_business_turn(
        &self,
        payload: &HybridAnswerRequest,
        state: &HybridWorkflowState,
        turn_id: &str,
        previous: Option<SessionState>,
    ) {
        let Some(session_id) = payload
            .session_id
            .as_deref()
            .map(str::trim)
            .filter(|session_id| !session_id.is_empty())
        else {
            return;
        };

        let mut session = previous.unwrap_or_default();
        Self::refresh_slots_from_payload(&mut session, payload);
        Self::refresh_slots_from_facts(&mut session, &state.business_facts);
        session.clear_clarification();
        session.push_turn(
            TurnRecord {
                turn_id: turn_id.to_string(),
                query: payload.query.clone(),
                intent: state.intent.map(|intent| intent.as_str().to_string()),
                order_no: session.slots.order_no.clone(),
            },
            self.memory_policy.max_turns,
        );

        self.write_memory(session_id, session).await;
    }

    async fn write_memory(&self, session_id: &str, state: SessionState) {
        if let Err(err) = self
            .session_store
            .put(session_id, state, self.memory_policy.ttl)
            .await
        {
            // Memory writes are best-effort and never fail the response.
            warn!(session_id, error = %err, "session write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parkassist_biz::{build_clarify_tools, BizFactTools, MockBizApi};
    use parkassist_knowledge::{
        ChunkIngestRequest, ChunkPayload, InMemoryKnowledgeStore, KnowledgeRepository,
        SourceUpsertRequest,
    };
    use parkassist_llm::MockChatModel;
    use parkassist_memory::InMemorySessionStore;

    use crate::synthesizer::AnswerSynthesizer;
    use crate::workflow::HybridWorkflow;
    use parkassist_core::GateDecision;

    const DIM: usize = 4;

    struct Harness {
        service: HybridAnswerService,
        biz: MockBizApi,
        resolver_llm: MockChatModel,
        synth_llm: MockChatModel,
        store: InMemorySessionStore,
    }

    async fn harness() -> Harness {
        let knowledge = InMemoryKnowledgeStore::new(DIM);
        knowledge
            .upsert_source(&SourceUpsertRequest {
                source_id: "src-1".into(),
                doc_type: "rule_explain".into(),
                source_type: "policy".into(),
                title: "计费规则".into(),
                city_code: None,
                lot_codes: vec![],
                effective_from: None,
                effective_to: None,
                version: None,
                source_uri: None,
                is_active: true,
            })
            .await
            .unwrap();
        knowledge
            .ingest_chunks(&ChunkIngestRequest {
                source_id: "src-1".into(),
                replace_existing: false,
                chunks: vec![ChunkPayload {
                    scenario_id: None,
                    chunk_index: 0,
                    chunk_text: "计费规则说明".into(),
                    embedding: vec![0.0; DIM],
                    metadata: serde_json::json!({}),
                }],
            })
            .await
            .unwrap();

        let biz = MockBizApi::new();
        let resolver_llm = MockChatModel::new();
        let synth_llm =
            MockChatModel::with_text(r#"{"conclusion": "结论", "key_points": ["要点"]}"#);
        let store = InMemorySessionStore::new();

        let resolver = TurnResolver::new(
            Some(Arc::new(resolver_llm.clone())),
            build_clarify_tools(Arc::new(biz.clone())),
        );
        let workflow = HybridWorkflow::new(
            Arc::new(knowledge),
            BizFactTools::new(Arc::new(biz.clone())),
            AnswerSynthesizer::new(Some(Arc::new(synth_llm.clone()))),
        );
        let service = HybridAnswerService::new(
            resolver,
            workflow,
            Arc::new(store.clone()),
            MemoryPolicy::default(),
        );

        Harness {
            service,
            biz,
            resolver_llm,
            synth_llm,
            store,
        }
    }

    fn request(query: &str) -> HybridAnswerRequest {
        HybridAnswerRequest::new(query)
    }

    #[tokio::test]
    async fn test_fee_verify_mismatch_scenario() {
        let h = harness().await;
        h.biz.set_order(
            "SCN-020",
            serde_json::json!({
                "billing_rule_code": "RULE-A",
                "entry_time": "2026-02-23T09:00:00",
                "exit_time": "2026-02-23T12:00:00",
                "total_amount": "6.00",
            }),
        );
        h.biz
            .set_simulation(serde_json::json!({"total_amount": "4.00"}));

        let mut payload = request("核验 SCN-020 的金额");
        payload.intent_hint = Some("fee_verify".into());
        payload.order_no = Some("SCN-020".into());

        let response = h.service.answer(&payload).await.unwrap();
        assert_eq!(response.intent, "fee_verify");
        assert_eq!(response.business_facts["amount_check_result"], "不一致");
        assert_eq!(response.business_facts["amount_check_action"], "需人工复核");
        assert!(response
            .graph_trace
            .contains(&"intent_classifier:fee_verify".to_string()));
        assert!(response
            .graph_trace
            .iter()
            .any(|tag| tag.starts_with("rag_retrieve:")));
        assert_eq!(h.resolver_llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_arrears_scenario_no_retrieval() {
        let h = harness().await;
        h.biz.set_arrears(vec![
            serde_json::json!({"order_no": "SCN-020"}),
            serde_json::json!({"order_no": "SCN-021"}),
        ]);

        let mut payload = request("沪SCN009 有没有欠费");
        payload.intent_hint = Some("arrears_check".into());
        payload.plate_no = Some("沪SCN009".into());
        payload.city_code = Some("310100".into());

        let response = h.service.answer(&payload).await.unwrap();
        assert_eq!(response.business_facts["arrears_count"], 2);
        assert_eq!(response.retrieved_count, 0);
        assert!(response.citations.is_empty());
    }

    #[tokio::test]
    async fn test_missing_order_no_short_circuits_without_react() {
        let h = harness().await;
        let mut payload = request("帮我核验订单金额");
        payload.intent_hint = Some("fee_verify".into());
        payload.session_id = Some("ses-sc".into());

        let response = h.service.answer(&payload).await.unwrap();
        assert_eq!(response.business_facts["error"], "missing_order_no");
        assert_eq!(response.retrieved_count, 0);
        assert!(response.conclusion.contains("SCN-020"));
        assert_eq!(h.resolver_llm.call_count(), 0);
        assert_eq!(h.synth_llm.call_count(), 0);

        // Clarifying terminal writes pending state.
        let state = h.store.get("ses-sc").await.unwrap().unwrap();
        let pending = state.pending_clarification.unwrap();
        assert_eq!(pending.decision, GateDecision::ClarifyShortCircuit);
        assert_eq!(pending.error.as_deref(), Some("missing_order_no"));
    }

    #[tokio::test]
    async fn test_cross_session_isolation() {
        let h = harness().await;
        h.biz.set_arrears(vec![serde_json::json!({
            "order_no": "SCN-020",
            "plate_no": "沪SCN020",
        })]);

        let mut first = request("帮我查下车牌沪SCN020有没有欠费");
        first.session_id = Some("ses-A".into());
        first.intent_hint = Some("arrears_check".into());
        first.plate_no = Some("沪SCN020".into());
        h.service.answer(&first).await.unwrap();

        // Session B must not see session A's slots.
        let mut second = request("这笔订单核验下");
        second.session_id = Some("ses-B".into());
        second.intent_hint = Some("fee_verify".into());
        let response = h.service.answer(&second).await.unwrap();
        assert_eq!(response.business_facts["error"], "missing_order_no");

        let state_b = h.store.get("ses-B").await.unwrap().unwrap();
        assert!(state_b.slots.plate_no.is_none());
    }

    #[tokio::test]
    async fn test_memory_carry_within_session() {
        let h = harness().await;
        h.biz.set_arrears(vec![serde_json::json!({
            "order_no": "SCN-020",
            "plate_no": "沪SCN020",
        })]);

        let mut first = request("查下沪SCN020的欠费");
        first.session_id = Some("ses-1".into());
        first.intent_hint = Some("arrears_check".into());
        first.plate_no = Some("沪SCN020".into());
        first.city_code = Some("310100".into());
        h.service.answer(&first).await.unwrap();

        // Second turn gives no plate_no; memory hydrates it.
        let mut second = request("再查一次欠费");
        second.session_id = Some("ses-1".into());
        second.intent_hint = Some("arrears_check".into());
        let response = h.service.answer(&second).await.unwrap();
        assert_eq!(response.business_facts["plate_no"], "沪SCN020");
        assert!(response
            .graph_trace
            .contains(&"slot_hydrate:plate_no".to_string()));
    }

    #[tokio::test]
    async fn test_continue_business_clears_pending_clarification() {
        let h = harness().await;
        let mut clarify = request("帮我核验订单金额");
        clarify.session_id = Some("ses-2".into());
        clarify.intent_hint = Some("fee_verify".into());
        h.service.answer(&clarify).await.unwrap();
        assert!(h
            .store
            .get("ses-2")
            .await
            .unwrap()
            .unwrap()
            .pending_clarification
            .is_some());

        h.biz.set_order(
            "SCN-020",
            serde_json::json!({
                "billing_rule_code": "RULE-A",
                "entry_time": "2026-02-23T09:00:00",
                "exit_time": "2026-02-23T12:00:00",
                "total_amount": "4.00",
            }),
        );
        h.biz
            .set_simulation(serde_json::json!({"total_amount": "4.00"}));

        let mut followup = request("订单号是 SCN-020");
        followup.session_id = Some("ses-2".into());
        followup.intent_hint = Some("fee_verify".into());

        let response = h.service.answer(&followup).await.unwrap();
        assert_eq!(response.business_facts["amount_check_result"], "一致");

        let state = h.store.get("ses-2").await.unwrap().unwrap();
        assert!(state.pending_clarification.is_none());
        assert!(state.clarify_messages.is_empty());
        assert_eq!(state.slots.order_no.as_deref(), Some("SCN-020"));
    }

    #[tokio::test]
    async fn test_react_clarification_continues_across_turns() {
        let h = harness().await;

        // Turn 1: unknown intent, parser LLM gives nothing useful, the
        // clarify agent asks for the order number.
        h.resolver_llm
            .push_text(r#"{"intent": "unknown", "slots": {}, "ambiguities": []}"#);
        h.resolver_llm.push_text(
            r#"{"action": "ask_user", "clarify_question": "请问订单号是多少？", "slot_updates": {}}"#,
        );

        let mut first = request("这个帮我核对一下");
        first.session_id = Some("ses-react".into());
        let response = h.service.answer(&first).await.unwrap();
        assert_eq!(response.business_facts["error"], "clarify_react_required");
        assert_eq!(response.conclusion, "请问订单号是多少？");

        let state = h.store.get("ses-react").await.unwrap().unwrap();
        assert!(!state.clarify_messages.is_empty());
        assert_eq!(
            state.pending_clarification.as_ref().unwrap().decision,
            GateDecision::ClarifyReact
        );

        // Turn 2: the user answers; the agent finishes with intent and slot,
        // continuing into the fee-verify branch.
        h.biz.set_order(
            "SCN-020",
            serde_json::json!({
                "billing_rule_code": "RULE-A",
                "entry_time": "2026-02-23T09:00:00",
                "exit_time": "2026-02-23T12:00:00",
                "total_amount": "4.00",
            }),
        );
        h.biz
            .set_simulation(serde_json::json!({"total_amount": "4.00"}));
        h.resolver_llm
            .push_text(r#"{"intent": "unknown", "slots": {}, "ambiguities": []}"#);
        h.resolver_llm.push_text(
            r#"{"action": "finish_clarify", "slot_updates": {"order_no": "SCN-020"},
               "resolved_intent": "fee_verify", "route_target": "fee_verify",
               "intent_evidence": ["用户补充了订单号"]}"#,
        );

        let mut second = request("订单号 想不起来了，应该是 那个二十号的");
        second.session_id = Some("ses-react".into());
        let response = h.service.answer(&second).await.unwrap();
        assert_eq!(response.intent, "fee_verify");
        assert_eq!(response.business_facts["amount_check_result"], "一致");

        // Clarify transcript was replayed to the model before the new query.
        let sent = h.resolver_llm.last_call().unwrap().messages;
        assert!(sent.iter().any(|m| m.content.contains("请问订单号是多少")));

        // Continue terminal clears the pending clarification.
        let state = h.store.get("ses-react").await.unwrap().unwrap();
        assert!(state.pending_clarification.is_none());
        assert!(state.clarify_messages.is_empty());
    }

    #[tokio::test]
    async fn test_turn_id_generated_when_absent() {
        let h = harness().await;
        let mut payload = request("停车怎么收费");
        payload.intent_hint = Some("rule_explain".into());

        let response = h.service.answer(&payload).await.unwrap();
        assert!(!response.turn_id.is_empty());
        assert_eq!(response.retrieved_count, 1);
        assert_eq!(response.citations.len(), 1);
        assert_eq!(response.citations[0].source_id, "src-1");
    }

    #[tokio::test]
    async fn test_invalid_request_rejected() {
        let h = harness().await;
        let mut payload = request("  ");
        payload.intent_hint = Some("rule_explain".into());
        assert!(h.service.answer(&payload).await.is_err());
    }

    #[tokio::test]
    async fn test_turn_log_is_bounded_and_recorded() {
        let h = harness().await;
        let mut payload = request("停车怎么收费");
        payload.session_id = Some("ses-3".into());
        payload.intent_hint = Some("rule_explain".into());
        payload.turn_id = Some("t1".into());
        h.service.answer(&payload).await.unwrap();

        let state = h.store.get("ses-3").await.unwrap().unwrap();
        assert_eq!(state.turns.len(), 1);
        assert_eq!(state.turns[0].turn_id, "t1");
        assert_eq!(state.turns[0].intent.as_deref(), Some("rule_explain"));
    }
}
