//! Tool trait for the clarify agent's introspection tools

use async_trait::async_trait;
use serde_json::Value;

/// JSON outcome of a tool call. Tools never fail at this seam; transport
/// errors are folded into a miss payload with a `reason`.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub payload: Value,
}

impl ToolOutcome {
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    pub fn is_hit(&self) -> bool {
        self.payload
            .get("hit")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn tool_name(&self) -> Option<&str> {
        self.payload.get("tool").and_then(Value::as_str)
    }
}

/// A tool the clarify agent may call between model rounds.
#[async_trait]
pub trait ClarifyTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;

    async fn invoke(&self, args: Value) -> ToolOutcome;
}
