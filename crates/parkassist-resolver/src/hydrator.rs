//! Stage 2: memory-backed slot hydration

use parkassist_core::{FieldSource, SessionState, SlotKey};

use crate::types::{IntentSlotParseResult, SlotHydrateResult};

/// Deterministic hydration: fill still-null slots from session memory
/// without ever touching a value the user supplied this turn.
pub struct SlotHydrator;

impl SlotHydrator {
    pub fn hydrate(
        parse_result: &IntentSlotParseResult,
        memory: Option<&SessionState>,
    ) -> SlotHydrateResult {
        let Some(memory) = memory else {
            return SlotHydrateResult {
                payload: parse_result.payload.clone(),
                field_sources: parse_result.field_sources.clone(),
                missing_required_slots: parse_result.missing_required_slots.clone(),
                trace: vec!["slot_hydrate:none".to_string()],
            };
        };

        let mut payload = parse_result.payload.clone();
        let mut field_sources = parse_result.field_sources.clone();
        let mut trace = Vec::new();

        for key in SlotKey::MEMORY_CARRY {
            if payload.slot(key).is_none() {
                if let Some(value) = memory.slots.get(key) {
                    payload.set_slot(key, value);
                    field_sources.insert(key, FieldSource::Memory);
                    trace.push(format!("slot_hydrate:{key}"));
                }
            }
        }

        let required = parse_result
            .intent
            .map(|intent| intent.required_slots())
            .unwrap_or_default();
        for key in required {
            if payload.slot(*key).is_none() {
                if let Some(value) = memory.slots.get(*key) {
                    payload.set_slot(*key, value);
                    field_sources.insert(*key, FieldSource::Memory);
                    trace.push(format!("slot_hydrate:required:{key}"));
                }
            }
        }

        if trace.is_empty() {
            trace.push("slot_hydrate:hit".to_string());
        }

        let missing_required_slots = payload.missing_required_slots(parse_result.intent);
        SlotHydrateResult {
            payload,
            field_sources,
            missing_required_slots,
            trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parkassist_core::{HybridAnswerRequest, Intent};
    use std::collections::HashMap;

    fn parse_result(
        payload: HybridAnswerRequest,
        intent: Option<Intent>,
    ) -> IntentSlotParseResult {
        let missing = payload.missing_required_slots(intent);
        let field_sources: HashMap<SlotKey, FieldSource> = SlotKey::ALL
            .iter()
            .filter(|key| payload.slot(**key).is_some())
            .map(|key| (*key, FieldSource::User))
            .collect();
        IntentSlotParseResult {
            payload,
            intent,
            intent_confidence: intent.map(|_| 1.0),
            field_sources,
            missing_required_slots: missing,
            ambiguities: Vec::new(),
            trace: vec!["intent_slot_parse:deterministic".to_string()],
        }
    }

    fn memory_with(plate_no: Option<&str>, city_code: Option<&str>, order_no: Option<&str>) -> SessionState {
        let mut state = SessionState::default();
        if let Some(plate_no) = plate_no {
            state.slots.set(SlotKey::PlateNo, plate_no);
        }
        if let Some(city_code) = city_code {
            state.slots.set(SlotKey::CityCode, city_code);
        }
        if let Some(order_no) = order_no {
            state.slots.set(SlotKey::OrderNo, order_no);
        }
        state
    }

    #[test]
    fn test_no_memory_emits_none_tag() {
        let result = SlotHydrator::hydrate(
            &parse_result(HybridAnswerRequest::new("q"), None),
            None,
        );
        assert_eq!(result.trace, vec!["slot_hydrate:none"]);
    }

    #[test]
    fn test_carry_set_hydrated_from_memory() {
        let memory = memory_with(Some("沪SCN020"), Some("310100"), None);
        let result = SlotHydrator::hydrate(
            &parse_result(HybridAnswerRequest::new("查欠费"), Some(Intent::ArrearsCheck)),
            Some(&memory),
        );
        assert_eq!(result.payload.plate_no.as_deref(), Some("沪SCN020"));
        assert_eq!(result.payload.city_code.as_deref(), Some("310100"));
        assert_eq!(
            result.field_sources.get(&SlotKey::PlateNo),
            Some(&FieldSource::Memory)
        );
        assert!(result.trace.contains(&"slot_hydrate:plate_no".to_string()));
        assert!(result.trace.contains(&"slot_hydrate:city_code".to_string()));
        assert!(result.missing_required_slots.is_empty());
    }

    #[test]
    fn test_order_no_not_in_carry_set() {
        // order_no only hydrates when required by the active intent.
        let memory = memory_with(None, None, Some("SCN-020"));
        let result = SlotHydrator::hydrate(
            &parse_result(HybridAnswerRequest::new("规则是什么"), Some(Intent::RuleExplain)),
            Some(&memory),
        );
        assert!(result.payload.order_no.is_none());
        assert_eq!(result.trace, vec!["slot_hydrate:hit"]);
    }

    #[test]
    fn test_required_slot_hydrated_for_intent() {
        let memory = memory_with(None, None, Some("SCN-020"));
        let result = SlotHydrator::hydrate(
            &parse_result(HybridAnswerRequest::new("帮我核验"), Some(Intent::FeeVerify)),
            Some(&memory),
        );
        assert_eq!(result.payload.order_no.as_deref(), Some("SCN-020"));
        assert!(result
            .trace
            .contains(&"slot_hydrate:required:order_no".to_string()));
        assert!(result.missing_required_slots.is_empty());
    }

    #[test]
    fn test_user_value_never_overwritten() {
        let memory = memory_with(Some("沪OLD000"), None, None);
        let mut payload = HybridAnswerRequest::new("查欠费");
        payload.plate_no = Some("沪NEW111".into());

        let result = SlotHydrator::hydrate(
            &parse_result(payload, Some(Intent::ArrearsCheck)),
            Some(&memory),
        );
        assert_eq!(result.payload.plate_no.as_deref(), Some("沪NEW111"));
        assert_eq!(
            result.field_sources.get(&SlotKey::PlateNo),
            Some(&FieldSource::User)
        );
    }

    #[test]
    fn test_memory_without_useful_slots_hits() {
        let memory = SessionState::default();
        let result = SlotHydrator::hydrate(
            &parse_result(HybridAnswerRequest::new("查欠费"), Some(Intent::ArrearsCheck)),
            Some(&memory),
        );
        assert_eq!(result.trace, vec!["slot_hydrate:hit"]);
        assert_eq!(result.missing_required_slots, vec![SlotKey::PlateNo]);
    }
}
