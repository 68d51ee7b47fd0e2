//! Scripted chat model for tests

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

use parkassist_core::{
    ChatMessage, ChatModel, ChatModelError, ChatResponse, CompletionOptions,
};

/// Mock `ChatModel` returning scripted responses in order and recording
/// every call. Clones share state so tests can inspect calls made through
/// an `Arc<dyn ChatModel>`.
#[derive(Clone)]
pub struct MockChatModel {
    inner: Arc<RwLock<MockInner>>,
}

struct MockInner {
    responses: Vec<ChatResponse>,
    response_index: usize,
    call_history: Vec<MockCall>,
    should_error: bool,
    error_message: String,
}

#[derive(Debug, Clone)]
pub struct MockCall {
    pub messages: Vec<ChatMessage>,
    pub tool_names: Vec<String>,
}

impl MockChatModel {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MockInner {
                responses: Vec::new(),
                response_index: 0,
                call_history: Vec::new(),
                should_error: false,
                error_message: "Mock error".to_string(),
            })),
        }
    }

    /// Shorthand for a mock answering a single text response.
    pub fn with_text(content: impl Into<String>) -> Self {
        let mock = Self::new();
        mock.push_text(content);
        mock
    }

    pub fn push_text(&self, content: impl Into<String>) {
        self.push_response(ChatResponse::text(content));
    }

    pub fn push_response(&self, response: ChatResponse) {
        self.inner.write().responses.push(response);
    }

    pub fn set_error(&self, message: impl Into<String>) {
        let mut inner = self.inner.write();
        inner.should_error = true;
        inner.error_message = message.into();
    }

    pub fn call_count(&self) -> usize {
        self.inner.read().call_history.len()
    }

    pub fn last_call(&self) -> Option<MockCall> {
        self.inner.read().call_history.last().cloned()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.inner.read().call_history.clone()
    }
}

impl Default for MockChatModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<ChatResponse, ChatModelError> {
        let mut inner = self.inner.write();
        inner.call_history.push(MockCall {
            messages: messages.to_vec(),
            tool_names: options.tools.iter().map(|t| t.name.clone()).collect(),
        });

        if inner.should_error {
            return Err(ChatModelError::Other(inner.error_message.clone()));
        }

        if inner.responses.is_empty() {
            return Ok(ChatResponse::text("Mock response"));
        }

        let response = inner.responses[inner.response_index].clone();
        if inner.response_index < inner.responses.len() - 1 {
            inner.response_index += 1;
        }
        Ok(response)
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parkassist_core::ToolCall;

    #[tokio::test]
    async fn test_scripted_responses_in_order() {
        let mock = MockChatModel::new();
        mock.push_text("first");
        mock.push_text("second");

        let messages = vec![ChatMessage::user("hi")];
        let options = CompletionOptions::default();

        let r1 = mock.complete(&messages, &options).await.unwrap();
        assert_eq!(r1.content, "first");
        let r2 = mock.complete(&messages, &options).await.unwrap();
        assert_eq!(r2.content, "second");
        // Last response repeats once the script runs out.
        let r3 = mock.complete(&messages, &options).await.unwrap();
        assert_eq!(r3.content, "second");
    }

    #[tokio::test]
    async fn test_error_injection() {
        let mock = MockChatModel::new();
        mock.set_error("boom");
        let result = mock
            .complete(&[ChatMessage::user("hi")], &CompletionOptions::default())
            .await;
        assert!(result.is_err());
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_tool_call_responses() {
        let mock = MockChatModel::new();
        mock.push_response(ChatResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "call_1".into(),
                name: "lookup_order".into(),
                arguments: serde_json::json!({"order_no": "SCN-020"}),
            }],
            model: None,
        });

        let response = mock
            .complete(&[ChatMessage::user("hi")], &CompletionOptions::default())
            .await
            .unwrap();
        assert!(response.has_tool_calls());
    }

    #[tokio::test]
    async fn test_clone_shares_history() {
        let mock = MockChatModel::with_text("ok");
        let cloned = mock.clone();
        cloned
            .complete(&[ChatMessage::user("hi")], &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(mock.call_count(), 1);
        assert_eq!(mock.last_call().unwrap().messages[0].content, "hi");
    }
}
