//! Intent-routed answer workflow

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use parkassist_biz::{BizFact, BizFactTools, ToolErrorFacts};
use parkassist_core::{
    ChatModelError, HybridAnswerRequest, Intent, KnowledgeError, KnowledgeRetriever,
    RetrievedChunk, RetrieveRequest, Trace,
};

use crate::synthesizer::{AnswerSynthesizer, NO_EVIDENCE_CONCLUSION};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("retrieval failed: {0}")]
    Retrieve(#[from] KnowledgeError),

    #[error("synthesis failed: {0}")]
    Synthesize(#[from] ChatModelError),
}

/// Accumulated state of one workflow run.
#[derive(Debug, Clone)]
pub struct HybridWorkflowState {
    pub intent: Option<Intent>,
    pub retrieved_items: Vec<RetrievedChunk>,
    pub business_facts: Value,
    pub conclusion: String,
    pub key_points: Vec<String>,
    pub model: String,
    pub trace: Trace,
}

/// Single entry (`intent_classifier`), single terminal (`answer_synthesizer`):
/// `rule_explain → rag_retrieve`, `fee_verify → fee_verify_flow →
/// rag_retrieve`, `arrears_check → arrears_check_flow → synthesizer`.
pub struct HybridWorkflow {
    retriever: Arc<dyn KnowledgeRetriever>,
    fact_tools: BizFactTools,
    synthesizer: AnswerSynthesizer,
}

impl HybridWorkflow {
    pub fn new(
        retriever: Arc<dyn KnowledgeRetriever>,
        fact_tools: BizFactTools,
        synthesizer: AnswerSynthesizer,
    ) -> Self {
        Self {
            retriever,
            fact_tools,
            synthesizer,
        }
    }

    /// Run the graph. `resolved_intent` is the resolver's verdict and is
    /// adopted verbatim; a missing intent here is a contract violation and
    /// skips straight to the synthesizer with an error fact.
    pub async fn run(
        &self,
        payload: &HybridAnswerRequest,
        resolved_intent: Option<Intent>,
    ) -> Result<HybridWorkflowState, WorkflowError> {
        let mut trace = Trace::new();
        let mut retrieved_items: Vec<RetrievedChunk> = Vec::new();

        let Some(intent) = resolved_intent else {
            trace.push("intent_classifier:missing_intent_contract");
            let facts =
                BizFact::ToolError(ToolErrorFacts::new(None, "missing_intent_contract"));
            return self
                .synthesize(payload, None, retrieved_items, facts.to_value(), trace)
                .await;
        };

        info!(intent = %intent, "workflow intent_classifier");
        trace.push(format!("intent_classifier:{intent}"));

        let facts = match intent {
            Intent::RuleExplain => {
                trace.push("rule_explain_flow");
                let facts = BizFact::rule_explain_note();
                retrieved_items = self.retrieve(payload, &mut trace).await?;
                facts
            }
            Intent::FeeVerify => {
                let facts = self.fact_tools.build_fee_verify_facts(payload).await;
                trace.push("fee_verify_flow");
                retrieved_items = self.retrieve(payload, &mut trace).await?;
                facts
            }
            Intent::ArrearsCheck => {
                let facts = self.fact_tools.build_arrears_facts(payload).await;
                trace.push("arrears_check_flow");
                facts
            }
        };

        self.synthesize(payload, Some(intent), retrieved_items, facts.to_value(), trace)
            .await
    }

    async fn retrieve(
        &self,
        payload: &HybridAnswerRequest,
        trace: &mut Trace,
    ) -> Result<Vec<RetrievedChunk>, WorkflowError> {
        let request = RetrieveRequest::from_answer_request(payload);
        let items = self.retriever.retrieve(&request).await?;
        info!(retrieved_count = items.len(), "workflow rag_retrieve");
        trace.push(format!("rag_retrieve:{}", items.len()));
        Ok(items)
    }

    async fn synthesize(
        &self,
        payload: &HybridAnswerRequest,
        intent: Option<Intent>,
        retrieved_items: Vec<RetrievedChunk>,
        business_facts: Value,
        mut trace: Trace,
    ) -> Result<HybridWorkflowState, WorkflowError> {
        let facts_empty = business_facts
            .as_object()
            .map(|facts| facts.is_empty())
            .unwrap_or(true);

        if retrieved_items.is_empty() && facts_empty {
            trace.push("answer_synthesizer:no_data");
            return Ok(HybridWorkflowState {
                intent,
                retrieved_items,
                business_facts,
                conclusion: NO_EVIDENCE_CONCLUSION.to_string(),
                key_points: Vec::new(),
                model: String::new(),
                trace,
            });
        }

        let (conclusion, key_points, model) = self
            .synthesizer
            .synthesize(&payload.query, &retrieved_items, &business_facts, intent)
            .await?;
        trace.push("answer_synthesizer");

        Ok(HybridWorkflowState {
            intent,
            retrieved_items,
            business_facts,
            conclusion,
            key_points,
            model,
            trace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parkassist_biz::MockBizApi;
    use parkassist_knowledge::{
        ChunkIngestRequest, ChunkPayload, InMemoryKnowledgeStore, KnowledgeRepository,
        SourceUpsertRequest,
    };
    use parkassist_llm::MockChatModel;

    const DIM: usize = 4;

    async fn seeded_store() -> InMemoryKnowledgeStore {
        let store = InMemoryKnowledgeStore::new(DIM);
        store
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
        store
            .ingest_chunks(&ChunkIngestRequest {
                source_id: "src-1".into(),
                replace_existing: false,
                chunks: vec![ChunkPayload {
                    scenario_id: None,
                    chunk_index: 0,
                    chunk_text: "停车计费规则按时段执行".into(),
                    embedding: vec![0.0; DIM],
                    metadata: serde_json::json!({}),
                }],
            })
            .await
            .unwrap();
        store
    }

    fn workflow_with(
        store: InMemoryKnowledgeStore,
        biz: &MockBizApi,
        synth: &MockChatModel,
    ) -> HybridWorkflow {
        HybridWorkflow::new(
            Arc::new(store),
            BizFactTools::new(Arc::new(biz.clone())),
            AnswerSynthesizer::new(Some(Arc::new(synth.clone()))),
        )
    }

    fn answer_json() -> &'static str {
        r#"{"conclusion": "结论", "key_points": ["要点"]}"#
    }

    #[tokio::test]
    async fn test_rule_explain_branch_retrieves() {
        let synth = MockChatModel::with_text(answer_json());
        let biz = MockBizApi::new();
        let workflow = workflow_with(seeded_store().await, &biz, &synth);

        let payload = HybridAnswerRequest::new("停车怎么收费");
        let state = workflow
            .run(&payload, Some(Intent::RuleExplain))
            .await
            .unwrap();

        assert_eq!(state.retrieved_items.len(), 1);
        assert_eq!(state.business_facts["note"], "RAG-only explanation flow");
        let tags = state.trace.tags();
        assert_eq!(tags[0], "intent_classifier:rule_explain");
        assert!(tags.contains(&"rule_explain_flow".to_string()));
        assert!(tags.contains(&"rag_retrieve:1".to_string()));
        assert_eq!(tags.last().unwrap(), "answer_synthesizer");
        // Business API untouched on the RAG-only branch.
        assert!(biz.calls().is_empty());
    }

    #[tokio::test]
    async fn test_arrears_branch_skips_retrieve() {
        let synth = MockChatModel::with_text(answer_json());
        let biz = MockBizApi::new();
        biz.set_arrears(vec![serde_json::json!({"order_no": "SCN-020"})]);
        let workflow = workflow_with(seeded_store().await, &biz, &synth);

        let mut payload = HybridAnswerRequest::new("查欠费");
        payload.plate_no = Some("沪SCN009".into());
        let state = workflow
            .run(&payload, Some(Intent::ArrearsCheck))
            .await
            .unwrap();

        assert!(state.retrieved_items.is_empty());
        assert_eq!(state.business_facts["arrears_count"], 1);
        let tags = state.trace.tags();
        assert!(tags.contains(&"arrears_check_flow".to_string()));
        assert!(!tags.iter().any(|tag| tag.starts_with("rag_retrieve")));
    }

    #[tokio::test]
    async fn test_fee_verify_branch_calls_tools_then_retrieves() {
        let synth = MockChatModel::with_text(answer_json());
        let biz = MockBizApi::new();
        biz.set_order(
            "SCN-020",
            serde_json::json!({
                "billing_rule_code": "RULE-A",
                "entry_time": "2026-02-23T09:00:00",
                "exit_time": "2026-02-23T12:00:00",
                "total_amount": "6.00",
            }),
        );
        biz.set_simulation(serde_json::json!({"total_amount": "4.00"}));
        let workflow = workflow_with(seeded_store().await, &biz, &synth);

        let mut payload = HybridAnswerRequest::new("核验 SCN-020");
        payload.order_no = Some("SCN-020".into());
        let state = workflow
            .run(&payload, Some(Intent::FeeVerify))
            .await
            .unwrap();

        assert_eq!(state.business_facts["amount_check_result"], "不一致");
        assert_eq!(state.business_facts["amount_check_action"], "需人工复核");
        let tags = state.trace.tags();
        assert_eq!(tags[0], "intent_classifier:fee_verify");
        assert!(tags.contains(&"fee_verify_flow".to_string()));
        assert!(tags.iter().any(|tag| tag.starts_with("rag_retrieve:")));
    }

    #[tokio::test]
    async fn test_missing_intent_contract() {
        let synth = MockChatModel::with_text(answer_json());
        let biz = MockBizApi::new();
        let workflow = workflow_with(seeded_store().await, &biz, &synth);

        let payload = HybridAnswerRequest::new("问题");
        let state = workflow.run(&payload, None).await.unwrap();

        assert_eq!(state.business_facts["error"], "missing_intent_contract");
        assert_eq!(
            state.trace.tags()[0],
            "intent_classifier:missing_intent_contract"
        );
        assert!(state.retrieved_items.is_empty());
    }

    #[tokio::test]
    async fn test_tool_error_still_synthesizes() {
        let synth = MockChatModel::with_text(answer_json());
        let biz = MockBizApi::new();
        biz.fail_arrears(Some(500));
        let workflow = workflow_with(seeded_store().await, &biz, &synth);

        let payload = HybridAnswerRequest::new("查欠费");
        let state = workflow
            .run(&payload, Some(Intent::ArrearsCheck))
            .await
            .unwrap();
        assert_eq!(state.business_facts["error"], "arrears_tool_http_error");
        assert_eq!(state.conclusion, "结论");
    }

    #[tokio::test]
    async fn test_synthesizer_error_propagates() {
        let synth = MockChatModel::new();
        synth.set_error("model down");
        let biz = MockBizApi::new();
        let workflow = workflow_with(seeded_store().await, &biz, &synth);

        let payload = HybridAnswerRequest::new("停车怎么收费");
        let result = workflow.run(&payload, Some(Intent::RuleExplain)).await;
        assert!(matches!(result, Err(WorkflowError::Synthesize(_))));
    }
}
