//! ParkAssist: hybrid-answer orchestration core for a parking-operations
//! assistant.
//!
//! The crate family splits along the seams of the turn pipeline:
//! resolver (intent/slot parsing, clarification), workflow (intent routing,
//! retrieval, synthesis), plus the billing engine, knowledge store, business
//! client and session memory backing them.

pub use parkassist_core::{
    AnswerCitation, ChatMessage, ChatModel, ChatModelError, ChatResponse, ClarifyTool,
    CompletionOptions, CoreError, FieldSource, GateDecision, HybridAnswerRequest,
    HybridAnswerResponse, Intent, KnowledgeError, KnowledgeRetriever, PendingClarification,
    Result, RetrieveRequest, RetrievedChunk, Role, SessionState, SessionStore, Settings, SlotKey,
    Slots, ToolCall, ToolOutcome, ToolSpec, Trace, TurnRecord,
};

pub use parkassist_billing::{
    simulate_fee, BillingError, FeeSimulation, PriceTier, RuleSegment, SegmentCharge, SegmentKind,
    TimeWindow,
};
pub use parkassist_biz::{
    build_clarify_tools, ArrearsFacts, BizApi, BizApiClient, BizApiError, BizFact, BizFactTools,
    FeeVerifyFacts, MockBizApi, ToolErrorFacts,
};
pub use parkassist_knowledge::{
    ChunkIngestRequest, ChunkPayload, InMemoryKnowledgeStore, KnowledgeChunk, KnowledgeRepository,
    KnowledgeSource, SourceUpsertRequest,
};
pub use parkassist_llm::{DeepSeekChatModel, MockChatModel};
pub use parkassist_memory::InMemorySessionStore;
pub use parkassist_resolver::{
    ClarifyReactDebugResult, ClarifyResult, GateResult, IntentSlotParseResult, IntentSlotParser,
    ReActClarifyAgent, ReactClarifyGate, ResolvedTurnContext, SlotHydrateResult, SlotHydrator,
    TurnResolver,
};
pub use parkassist_workflow::{
    AnswerSynthesizer, HybridAnswerService, HybridWorkflow, HybridWorkflowState, MemoryPolicy,
    WorkflowError, NO_EVIDENCE_CONCLUSION,
};

#[cfg(feature = "postgres")]
pub use parkassist_knowledge::PgKnowledgeStore;

#[cfg(feature = "redis-storage")]
pub use parkassist_memory::RedisSessionStore;

use std::sync::Arc;
use std::time::Duration;

/// Assemble a `HybridAnswerService` from settings and the two external
/// stores. The chat model is shared by the parser, clarify agent and
/// synthesizer; without an API key all LLM paths degrade deterministically.
pub struct ServiceBuilder {
    settings: Settings,
    session_store: Arc<dyn SessionStore>,
    retriever: Arc<dyn KnowledgeRetriever>,
    biz: Arc<dyn BizApi>,
    chat_model: Option<Arc<dyn ChatModel>>,
}

impl ServiceBuilder {
    pub fn new(
        settings: Settings,
        session_store: Arc<dyn SessionStore>,
        retriever: Arc<dyn KnowledgeRetriever>,
        biz: Arc<dyn BizApi>,
    ) -> Self {
        Self {
            settings,
            session_store,
            retriever,
            biz,
            chat_model: None,
        }
    }

    /// Override the chat model (tests inject a mock here).
    pub fn with_chat_model(mut self, chat_model: Arc<dyn ChatModel>) -> Self {
        self.chat_model = Some(chat_model);
        self
    }

    pub fn build(self) -> HybridAnswerService {
        let chat_model = self.chat_model.or_else(|| {
            self.settings.has_llm_api_key().then(|| {
                Arc::new(DeepSeekChatModel::new(
                    &self.settings.deepseek_base_url,
                    &self.settings.deepseek_api_key,
                    &self.settings.deepseek_model,
                )) as Arc<dyn ChatModel>
            })
        });

        let resolver = TurnResolver::new(
            chat_model.clone(),
            build_clarify_tools(Arc::clone(&self.biz)),
        );
        let synthesizer = AnswerSynthesizer::new(chat_model).with_payload_logging(
            self.settings.llm_log_full_payload,
            self.settings.llm_log_max_chars,
        );
        let workflow = HybridWorkflow::new(
            self.retriever,
            BizFactTools::new(self.biz),
            synthesizer,
        );
        let memory_policy = MemoryPolicy {
            ttl: Duration::from_secs(self.settings.memory_ttl_seconds),
            max_turns: self.settings.memory_max_turns,
            max_clarify_messages: self.settings.memory_max_clarify_messages,
        };

        HybridAnswerService::new(resolver, workflow, self.session_store, memory_policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builder_without_api_key_degrades_deterministically() {
        let settings = Settings::default();
        let service = ServiceBuilder::new(
            settings,
            Arc::new(InMemorySessionStore::new()),
            Arc::new(InMemoryKnowledgeStore::new(4)),
            Arc::new(MockBizApi::new()),
        )
        .build();

        // A hint-resolved turn with a missing slot short-circuits without
        // any model configured.
        let mut payload = HybridAnswerRequest::new("帮我核验订单");
        payload.intent_hint = Some("fee_verify".into());
        let response = service.answer(&payload).await.unwrap();
        assert_eq!(response.business_facts["error"], "missing_order_no");
    }

    #[tokio::test]
    async fn test_builder_with_injected_mock_model() {
        let mock = MockChatModel::with_text(
            r#"{"conclusion": "按时段计费", "key_points": []}"#,
        );
        let service = ServiceBuilder::new(
            Settings::default(),
            Arc::new(InMemorySessionStore::new()),
            Arc::new(InMemoryKnowledgeStore::new(4)),
            Arc::new(MockBizApi::new()),
        )
        .with_chat_model(Arc::new(mock))
        .build();

        let mut payload = HybridAnswerRequest::new("停车怎么收费");
        payload.intent_hint = Some("rule_explain".into());
        let response = service.answer(&payload).await.unwrap();
        assert_eq!(response.intent, "rule_explain");
        assert_eq!(response.conclusion, "按时段计费");
    }
}
