//! Session memory state carried across turns of one session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::message::ChatMessage;
use crate::types::{GateDecision, SlotKey};

/// Last-known slot values for a session. Values are only ever replaced by
/// non-null values; a turn that omits a slot leaves the remembered one alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Slots {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lot_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plate_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_time: Option<DateTime<Utc>>,
}

impl Slots {
    pub fn get(&self, key: SlotKey) -> Option<&str> {
        match key {
            SlotKey::CityCode => self.city_code.as_deref(),
            SlotKey::LotCode => self.lot_code.as_deref(),
            SlotKey::PlateNo => self.plate_no.as_deref(),
            SlotKey::OrderNo => self.order_no.as_deref(),
        }
    }

    pub fn set(&mut self, key: SlotKey, value: impl Into<String>) {
        let value = Some(value.into());
        match key {
            SlotKey::CityCode => self.city_code = value,
            SlotKey::LotCode => self.lot_code = value,
            SlotKey::PlateNo => self.plate_no = value,
            SlotKey::OrderNo => self.order_no = value,
        }
    }
}

/// One entry of the bounded turn log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_id: String,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_no: Option<String>,
}

/// Clarification the session is waiting on, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingClarification {
    pub decision: GateDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Full per-session short-term memory.
///
/// Invariant: a `continue_business` terminal clears `pending_clarification`
/// and `clarify_messages`; a clarifying terminal writes them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub slots: Slots,
    #[serde(default)]
    pub turns: Vec<TurnRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_clarification: Option<PendingClarification>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clarify_messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_slots: Option<HashMap<String, String>>,
}

impl SessionState {
    /// Append a turn, keeping only the newest `max_turns` entries.
    pub fn push_turn(&mut self, record: TurnRecord, max_turns: usize) {
        self.turns.push(record);
        if self.turns.len() > max_turns {
            let overflow = self.turns.len() - max_turns;
            self.turns.drain(..overflow);
        }
    }

    /// Replace the clarify transcript, keeping only the newest
    /// `max_messages` entries.
    pub fn set_clarify_messages(&mut self, messages: Vec<ChatMessage>, max_messages: usize) {
        let skip = messages.len().saturating_sub(max_messages);
        self.clarify_messages = messages.into_iter().skip(skip).collect();
    }

    /// Transition for a `continue_business` terminal.
    pub fn clear_clarification(&mut self) {
        self.pending_clarification = None;
        self.clarify_messages.clear();
        self.resolved_slots = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(id: &str) -> TurnRecord {
        TurnRecord {
            turn_id: id.to_string(),
            query: "q".into(),
            intent: None,
            order_no: None,
        }
    }

    #[test]
    fn test_push_turn_truncates_oldest_first() {
        let mut state = SessionState::default();
        for i in 0..5 {
            state.push_turn(turn(&format!("t{i}")), 3);
        }
        let ids: Vec<_> = state.turns.iter().map(|t| t.turn_id.as_str()).collect();
        assert_eq!(ids, vec!["t2", "t3", "t4"]);
    }

    #[test]
    fn test_clarify_messages_bounded() {
        let mut state = SessionState::default();
        let messages: Vec<_> = (0..6)
            .map(|i| ChatMessage::user(format!("m{i}")))
            .collect();
        state.set_clarify_messages(messages, 4);
        assert_eq!(state.clarify_messages.len(), 4);
        assert_eq!(state.clarify_messages[0].content, "m2");
        assert_eq!(state.clarify_messages[3].content, "m5");
    }

    #[test]
    fn test_clear_clarification() {
        let mut state = SessionState {
            pending_clarification: Some(PendingClarification {
                decision: GateDecision::ClarifyReact,
                error: Some("missing_intent".into()),
            }),
            clarify_messages: vec![ChatMessage::user("hi")],
            resolved_slots: Some(HashMap::from([("order_no".into(), "SCN-1".into())])),
            ..Default::default()
        };
        state.clear_clarification();
        assert!(state.pending_clarification.is_none());
        assert!(state.clarify_messages.is_empty());
        assert!(state.resolved_slots.is_none());
    }

    #[test]
    fn test_slots_by_key() {
        let mut slots = Slots::default();
        slots.set(SlotKey::PlateNo, "沪SCN009");
        assert_eq!(slots.get(SlotKey::PlateNo), Some("沪SCN009"));
        assert!(slots.get(SlotKey::OrderNo).is_none());
    }
}
