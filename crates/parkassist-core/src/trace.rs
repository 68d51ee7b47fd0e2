//! Ordered trace tags accumulated across resolver and workflow nodes

use serde::{Deserialize, Serialize};

/// Header used to propagate the per-request trace id to downstream calls.
pub const TRACE_ID_HEADER: &str = "X-Trace-Id";

pub fn new_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Append-only list of string tags. Content and ordering must be
/// deterministic for fixed inputs, so tags never embed wall-clock values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trace(Vec<String>);

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tag: impl Into<String>) {
        self.0.push(tag.into());
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = String>) {
        self.0.extend(other);
    }

    pub fn tags(&self) -> &[String] {
        &self.0
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.iter().any(|item| item == tag)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<String>> for Trace {
    fn from(tags: Vec<String>) -> Self {
        Self(tags)
    }
}

impl IntoIterator for Trace {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_accumulation() {
        let mut trace = Trace::new();
        trace.push("intent_slot_parse:deterministic");
        trace.extend(vec!["slot_hydrate:none".to_string()]);
        assert_eq!(trace.len(), 2);
        assert!(trace.contains("slot_hydrate:none"));
        assert!(!trace.contains("rag_retrieve:0"));
    }

    #[test]
    fn test_trace_serializes_as_plain_list() {
        let trace = Trace::from(vec!["a".to_string(), "b".to_string()]);
        let json = serde_json::to_string(&trace).unwrap();
        assert_eq!(json, r#"["a","b"]"#);
    }

    #[test]
    fn test_trace_id_is_unique() {
        assert_ne!(new_trace_id(), new_trace_id());
    }
}
