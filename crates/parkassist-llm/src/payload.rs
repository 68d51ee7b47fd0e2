//! Compact LLM payload rendering for logs

use parkassist_core::{ChatMessage, Role};

/// Render messages as a single-line JSON array for log lines.
pub fn dump_messages(messages: &[ChatMessage]) -> String {
    let rendered: Vec<serde_json::Value> = messages
        .iter()
        .map(|message| {
            serde_json::json!({
                "role": role_label(message.role),
                "content": message.content,
            })
        })
        .collect();
    serde_json::to_string(&rendered).unwrap_or_default()
}

/// Trim a payload dump to `max_chars` unless full-payload logging is on.
pub fn trim_payload_text(text: &str, full_payload: bool, max_chars: usize) -> String {
    if full_payload {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}
