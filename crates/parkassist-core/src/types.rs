//! Wire types and validation for the hybrid-answer engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const TOP_K_MIN: usize = 1;
pub const TOP_K_MAX: usize = 20;

fn default_top_k() -> usize {
    5
}

/// Coarse user goal. The set is closed; anything else is "unknown" and must
/// go through clarification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    RuleExplain,
    ArrearsCheck,
    FeeVerify,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::RuleExplain => "rule_explain",
            Intent::ArrearsCheck => "arrears_check",
            Intent::FeeVerify => "fee_verify",
        }
    }

    pub fn parse(value: &str) -> Option<Intent> {
        match value.trim() {
            "rule_explain" => Some(Intent::RuleExplain),
            "arrears_check" => Some(Intent::ArrearsCheck),
            "fee_verify" => Some(Intent::FeeVerify),
            _ => None,
        }
    }

    /// Slots that must be present before the branch for this intent may run.
    pub fn required_slots(&self) -> &'static [SlotKey] {
        match self {
            Intent::FeeVerify => &[SlotKey::OrderNo],
            Intent::ArrearsCheck => &[SlotKey::PlateNo],
            Intent::RuleExplain => &[],
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a slot value came from this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldSource {
    User,
    Memory,
    Inferred,
}

/// Terminal decision of the resolver gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    ContinueBusiness,
    ClarifyShortCircuit,
    ClarifyReact,
    ClarifyAbort,
}

impl GateDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateDecision::ContinueBusiness => "continue_business",
            GateDecision::ClarifyShortCircuit => "clarify_short_circuit",
            GateDecision::ClarifyReact => "clarify_react",
            GateDecision::ClarifyAbort => "clarify_abort",
        }
    }

    pub fn is_clarifying(&self) -> bool {
        !matches!(self, GateDecision::ContinueBusiness)
    }
}

/// String-valued request slots addressable by key. `at_time` is a timestamp
/// and is not part of this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKey {
    CityCode,
    LotCode,
    PlateNo,
    OrderNo,
}

impl SlotKey {
    pub const ALL: [SlotKey; 4] = [
        SlotKey::CityCode,
        SlotKey::LotCode,
        SlotKey::PlateNo,
        SlotKey::OrderNo,
    ];

    /// Slots carried forward from session memory regardless of intent.
    pub const MEMORY_CARRY: [SlotKey; 3] = [SlotKey::CityCode, SlotKey::LotCode, SlotKey::PlateNo];

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotKey::CityCode => "city_code",
            SlotKey::LotCode => "lot_code",
            SlotKey::PlateNo => "plate_no",
            SlotKey::OrderNo => "order_no",
        }
    }

    pub fn parse(value: &str) -> Option<SlotKey> {
        match value {
            "city_code" => Some(SlotKey::CityCode),
            "lot_code" => Some(SlotKey::LotCode),
            "plate_no" => Some(SlotKey::PlateNo),
            "order_no" => Some(SlotKey::OrderNo),
            _ => None,
        }
    }
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One turn of the hybrid answer API. Immutable per turn; the resolver works
/// on copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridAnswerRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    pub query: String,
    /// Raw intent hint; values outside the known set are ignored by parsing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_embedding: Option<Vec<f32>>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lot_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ids: Option<Vec<String>>,
    #[serde(default)]
    pub include_inactive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plate_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_time: Option<DateTime<Utc>>,
}

impl HybridAnswerRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            session_id: None,
            turn_id: None,
            query: query.into(),
            intent_hint: None,
            query_embedding: None,
            top_k: default_top_k(),
            doc_type: None,
            source_type: None,
            city_code: None,
            lot_code: None,
            at_time: None,
            source_ids: None,
            include_inactive: false,
            plate_no: None,
            order_no: None,
            rule_code: None,
            entry_time: None,
            exit_time: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(CoreError::Validation("query must not be empty".into()));
        }
        if self.top_k < TOP_K_MIN || self.top_k > TOP_K_MAX {
            return Err(CoreError::Validation(format!(
                "top_k must be within [{TOP_K_MIN}, {TOP_K_MAX}], got {}",
                self.top_k
            )));
        }
        Ok(())
    }

    pub fn slot(&self, key: SlotKey) -> Option<&str> {
        match key {
            SlotKey::CityCode => self.city_code.as_deref(),
            SlotKey::LotCode => self.lot_code.as_deref(),
            SlotKey::PlateNo => self.plate_no.as_deref(),
            SlotKey::OrderNo => self.order_no.as_deref(),
        }
    }

    pub fn set_slot(&mut self, key: SlotKey, value: impl Into<String>) {
        let value = Some(value.into());
        match key {
            SlotKey::CityCode => self.city_code = value,
            SlotKey::LotCode => self.lot_code = value,
            SlotKey::PlateNo => self.plate_no = value,
            SlotKey::OrderNo => self.order_no = value,
        }
    }

    /// Hinted intent, if the hint names a member of the closed set.
    pub fn hinted_intent(&self) -> Option<Intent> {
        self.intent_hint.as_deref().and_then(Intent::parse)
    }

    pub fn missing_required_slots(&self, intent: Option<Intent>) -> Vec<SlotKey> {
        intent
            .map(|intent| {
                intent
                    .required_slots()
                    .iter()
                    .copied()
                    .filter(|key| self.slot(*key).is_none())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Retrieval parameters, either embedded in a turn or issued standalone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_embedding: Option<Vec<f32>>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lot_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ids: Option<Vec<String>>,
    #[serde(default)]
    pub include_inactive: bool,
}

impl RetrieveRequest {
    pub fn from_answer_request(payload: &HybridAnswerRequest) -> Self {
        Self {
            query: payload.query.clone(),
            query_embedding: payload.query_embedding.clone(),
            top_k: payload.top_k,
            doc_type: payload.doc_type.clone(),
            source_type: payload.source_type.clone(),
            city_code: payload.city_code.clone(),
            lot_code: payload.lot_code.clone(),
            at_time: payload.at_time,
            source_ids: payload.source_ids.clone(),
            include_inactive: payload.include_inactive,
        }
    }
}

/// One retrieved knowledge chunk joined with its source row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: i64,
    pub source_pk: i64,
    pub source_id: String,
    pub doc_type: String,
    pub source_type: String,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

const SNIPPET_MAX_CHARS: usize = 160;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerCitation {
    pub chunk_id: i64,
    pub source_id: String,
    pub doc_type: String,
    pub title: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl AnswerCitation {
    pub fn from_chunk(item: &RetrievedChunk) -> Self {
        Self {
            chunk_id: item.chunk_id,
            source_id: item.source_id.clone(),
            doc_type: item.doc_type.clone(),
            title: item.title.clone(),
            snippet: item.content.chars().take(SNIPPET_MAX_CHARS).collect(),
            score: item.score,
        }
    }
}

/// Final response of one hybrid-answer turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridAnswerResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub turn_id: String,
    pub memory_ttl_seconds: u64,
    pub intent: String,
    pub conclusion: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub business_facts: serde_json::Value,
    #[serde(default)]
    pub citations: Vec<AnswerCitation>,
    pub retrieved_count: usize,
    pub model: String,
    #[serde(default)]
    pub graph_trace: Vec<String>,
}
