//! DeepSeek chat completions over the OpenAI-compatible wire format

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use parkassist_core::{
    ChatMessage, ChatModel, ChatModelError, ChatResponse, CompletionOptions, Role, ToolCall,
    ToolSpec,
};

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded argument object, per the OpenAI wire contract.
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolSpec,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool<'a>>>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

/// `ChatModel` backed by the DeepSeek chat completions endpoint.
pub struct DeepSeekChatModel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl DeepSeekChatModel {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn to_wire<'a>(messages: &'a [ChatMessage]) -> Vec<WireMessage<'a>> {
        messages
            .iter()
            .map(|message| WireMessage {
                role: match message.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                },
                content: &message.content,
                tool_call_id: message.tool_call_id.as_deref(),
                tool_calls: if message.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        message
                            .tool_calls
                            .iter()
                            .map(|call| WireToolCall {
                                id: call.id.clone(),
                                kind: "function".to_string(),
                                function: WireFunctionCall {
                                    name: call.name.clone(),
                                    arguments: call.arguments.to_string(),
                                },
                            })
                            .collect(),
                    )
                },
            })
            .collect()
    }

    fn from_wire_calls(calls: Vec<WireToolCall>) -> Vec<ToolCall> {
        calls
            .into_iter()
            .map(|call| {
                let arguments = serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| {
                    warn!(
                        tool = %call.function.name,
                        "tool call arguments were not valid JSON, passing empty object"
                    );
                    serde_json::json!({})
                });
                ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments,
                }
            })
            .collect()
    }
}

#[async_trait]
impl ChatModel for DeepSeekChatModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<ChatResponse, ChatModelError> {
        if self.api_key.trim().is_empty() {
            return Err(ChatModelError::Config(
                "DeepSeek API key is not configured".into(),
            ));
        }

        let tools: Option<Vec<WireTool<'_>>> = if options.tools.is_empty() {
            None
        } else {
            Some(
                options
                    .tools
                    .iter()
                    .map(|spec| WireTool {
                        kind: "function",
                        function: spec,
                    })
                    .collect(),
            )
        };

        let request = ChatCompletionRequest {
            model: &self.model,
            messages: Self::to_wire(messages),
            temperature: options.temperature,
            tools,
        };

        debug!(
            model = %self.model,
            messages = messages.len(),
            tools = options.tools.len(),
            "llm request"
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .timeout(options.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ChatModelError::Timeout(options.timeout)
                } else {
                    ChatModelError::Network(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatModelError::Api {
                message: body,
                status: Some(status.as_u16()),
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| ChatModelError::Serialization(err.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ChatModelError::Api {
                message: "response carried no choices".into(),
                status: None,
            })?;

        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: Self::from_wire_calls(choice.message.tool_calls.unwrap_or_default()),
            model: parsed.model,
        })
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
