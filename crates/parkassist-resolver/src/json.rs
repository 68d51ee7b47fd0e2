//! JSON extraction from model responses that may carry markdown fences

/// Extract the JSON object from an LLM response. Handles fenced code blocks
/// and surrounding prose; returns the trimmed input when nothing better is
/// found.
pub fn extract_json(content: &str) -> &str {
    let trimmed = content.trim();

    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return trimmed;
    }

    if let Some(start) = trimmed.find("```") {
        let after_ticks = &trimmed[start + 3..];
        if let Some(end) = after_ticks.find("```") {
            let block = &after_ticks[..end];
            // Drop a possible language tag on the opening fence line.
            let body = match block.find('\n') {
                Some(newline) => &block[newline..],
                None => block,
            };
            let body = body.trim();
            if !body.is_empty() {
                return body;
            }
        }
    }

    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                return &trimmed[start..=end];
            }
        }
    }

    trimmed
}

/// Parse the extracted JSON into an object, or `None` when the response is
/// not an object.
pub fn parse_json_object(content: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
    match serde_json::from_str(extract_json(content)) {
        Ok(serde_json::Value::Object(map)) => Some(map),
        _ => None,
    }
}
