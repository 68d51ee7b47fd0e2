//! Grounded answer synthesis over facts and retrieved chunks

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use parkassist_core::{
    ChatMessage, ChatModel, ChatModelError, CompletionOptions, Intent, RetrievedChunk,
};
use parkassist_llm::trim_payload_text;
use parkassist_resolver::extract_json;

pub const NO_EVIDENCE_CONCLUSION: &str = "未检索到可用证据，暂时无法回答该问题。";
const EMPTY_CONCLUSION: &str = "未生成结论";
const SYNTH_TIMEOUT_SECS: u64 = 8;

const SYNTH_SYSTEM_PROMPT: &str = "你是停车业务混合助手。必须同时参考业务事实和证据片段，禁止编造。\
输出严格 JSON: {\"conclusion\": string, \"key_points\": [string,...]}。";

fn render_context(items: &[RetrievedChunk]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            format!(
                "[{}] source_id={} chunk_id={}\ndoc_type={} title={}\nscore={}\ncontent={}",
                index + 1,
                item.source_id,
                item.chunk_id,
                item.doc_type,
                item.title,
                item.score
                    .map(|score| score.to_string())
                    .unwrap_or_else(|| "None".to_string()),
                item.content,
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// LLM-backed synthesizer producing `(conclusion, key_points, model_id)`.
/// A response that is not valid JSON falls back to the raw text as the
/// conclusion.
pub struct AnswerSynthesizer {
    llm: Option<Arc<dyn ChatModel>>,
    llm_timeout: Duration,
    log_full_payload: bool,
    log_max_chars: usize,
}

impl AnswerSynthesizer {
    pub fn new(llm: Option<Arc<dyn ChatModel>>) -> Self {
        Self {
            llm,
            llm_timeout: Duration::from_secs(SYNTH_TIMEOUT_SECS),
            log_full_payload: false,
            log_max_chars: 1000,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    pub fn with_payload_logging(mut self, full_payload: bool, max_chars: usize) -> Self {
        self.log_full_payload = full_payload;
        self.log_max_chars = max_chars;
        self
    }

    pub async fn synthesize(
        &self,
        query: &str,
        items: &[RetrievedChunk],
        business_facts: &Value,
        intent: Option<Intent>,
    ) -> Result<(String, Vec<String>, String), ChatModelError> {
        let Some(llm) = &self.llm else {
            return Err(ChatModelError::Config(
                "synthesizer model is not configured".into(),
            ));
        };

        let context = render_context(items);
        let facts = serde_json::to_string(business_facts)?;
        let prompt = format!(
            "用户问题:\n{}\n\n意图类型:\n{}\n\n业务事实:\n{}\n\n证据片段:\n{}\n\n请生成结论和要点。",
            query,
            intent.map(|i| i.as_str()).unwrap_or("unknown"),
            facts,
            context,
        );

        info!(
            intent = intent.map(|i| i.as_str()).unwrap_or("unknown"),
            evidence_count = items.len(),
            model = llm.model_id(),
            "llm[hybrid] input"
        );
        info!(
            input_prompt = %trim_payload_text(&prompt, self.log_full_payload, self.log_max_chars),
            "llm[hybrid] input_prompt"
        );

        let messages = vec![
            ChatMessage::system(SYNTH_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ];
        let options = CompletionOptions::default().with_timeout(self.llm_timeout);
        let response = llm.complete(&messages, &options).await?;
        let model_id = response
            .model
            .unwrap_or_else(|| llm.model_id().to_string());

        info!(
            output = %trim_payload_text(&response.content, self.log_full_payload, self.log_max_chars),
            "llm[hybrid] output"
        );

        let Ok(Value::Object(parsed)) =
            serde_json::from_str::<Value>(extract_json(&response.content))
        else {
            info!("llm[hybrid] parse_result=raw_text_fallback");
            return Ok((response.content.trim().to_string(), Vec::new(), model_id));
        };

        let conclusion = parsed
            .get("conclusion")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|conclusion| !conclusion.is_empty())
            .unwrap_or(EMPTY_CONCLUSION)
            .to_string();
        let key_points = parsed
            .get("key_points")
            .and_then(Value::as_array)
            .map(|points| {
                points
                    .iter()
                    .filter_map(|point| point.as_str())
                    .map(str::trim)
                    .filter(|point| !point.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        info!(key_points = key_points.len(), "llm[hybrid] parse_result=json");
        Ok((conclusion, key_points, model_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parkassist_llm::MockChatModel;

    fn chunk(id: i64, content: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: id,
            source_pk: 1,
            source_id: "src-1".into(),
            doc_type: "rule_explain".into(),
            source_type: "policy".into(),
            title: "计费规则".into(),
            content: content.into(),
            scenario_id: None,
            metadata: serde_json::json!({}),
            score: Some(0.1),
        }
    }

    #[tokio::test]
    async fn test_strict_json_parsed() {
        let mock = MockChatModel::with_text(
            r#"{"conclusion": "按时段计费。", "key_points": ["首30分钟免费", "封顶20元"]}"#,
        );
        let synthesizer = AnswerSynthesizer::new(Some(Arc::new(mock)));

        let (conclusion, key_points, model) = synthesizer
            .synthesize(
                "怎么收费",
                &[chunk(1, "首30分钟免费")],
                &serde_json::json!({"intent": "rule_explain"}),
                Some(Intent::RuleExplain),
            )
            .await
            .unwrap();
        assert_eq!(conclusion, "按时段计费。");
        assert_eq!(key_points.len(), 2);
        assert_eq!(model, "mock-model");
    }

    #[tokio::test]
    async fn test_raw_text_fallback() {
        let mock = MockChatModel::with_text("抱歉，这里直接给出说明而不是JSON。");
        let synthesizer = AnswerSynthesizer::new(Some(Arc::new(mock)));

        let (conclusion, key_points, _) = synthesizer
            .synthesize("怎么收费", &[], &serde_json::json!({}), None)
            .await
            .unwrap();
        assert_eq!(conclusion, "抱歉，这里直接给出说明而不是JSON。");
        assert!(key_points.is_empty());
    }

    #[tokio::test]
    async fn test_empty_conclusion_placeholder() {
        let mock = MockChatModel::with_text(r#"{"conclusion": "", "key_points": []}"#);
        let synthesizer = AnswerSynthesizer::new(Some(Arc::new(mock)));

        let (conclusion, _, _) = synthesizer
            .synthesize("怎么收费", &[], &serde_json::json!({}), None)
            .await
            .unwrap();
        assert_eq!(conclusion, EMPTY_CONCLUSION);
    }

    #[tokio::test]
    async fn test_missing_model_is_config_error() {
        let synthesizer = AnswerSynthesizer::new(None);
        let result = synthesizer
            .synthesize("怎么收费", &[], &serde_json::json!({}), None)
            .await;
        assert!(matches!(result, Err(ChatModelError::Config(_))));
    }

    #[test]
    fn test_render_context_numbering() {
        let rendered = render_context(&[chunk(1, "A"), chunk(2, "B")]);
        assert!(rendered.contains("[1] source_id=src-1 chunk_id=1"));
        assert!(rendered.contains("[2] source_id=src-1 chunk_id=2"));
    }
}
