//! Billing rule payload and simulation result types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TIMEZONE: &str = "Asia/Shanghai";

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

/// Daily window in local wall-clock time. `start == end` means the whole
/// day; `start > end` wraps across midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// `HH:MM`
    pub start: String,
    /// `HH:MM`
    pub end: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

/// One pricing tier of a tiered segment, matched against the start minute of
/// each billing unit. A missing `end_minute` leaves the tier open-ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTier {
    #[serde(default)]
    pub start_minute: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_minute: Option<u32>,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SegmentKind {
    Free,
    Periodic {
        unit_minutes: u32,
        unit_price: Decimal,
        #[serde(default)]
        free_minutes: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_charge: Option<Decimal>,
    },
    Tiered {
        unit_minutes: u32,
        tiers: Vec<PriceTier>,
        #[serde(default)]
        free_minutes: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_charge: Option<Decimal>,
    },
}

impl SegmentKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            SegmentKind::Free => "free",
            SegmentKind::Periodic { .. } => "periodic",
            SegmentKind::Tiered { .. } => "tiered",
        }
    }
}

/// One segment of a billing rule payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSegment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub kind: SegmentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
    /// ISO weekdays, Monday = 1 through Sunday = 7.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekdays: Option<Vec<u32>>,
}

impl RuleSegment {
    pub fn display_name(&self, index: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("segment_{}", index + 1))
    }

    pub fn timezone_name(&self) -> &str {
        self.time_window
            .as_ref()
            .map(|window| window.timezone.as_str())
            .unwrap_or(DEFAULT_TIMEZONE)
    }
}

/// Per-segment charge line of a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentCharge {
    pub segment_name: String,
    pub segment_type: String,
    pub minutes: u64,
    pub amount: Decimal,
    #[serde(default)]
    pub free_minutes: u64,
    #[serde(default)]
    pub capped: bool,
}

/// Simulation result: total and per-segment breakdown, both quantized to
/// two decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeSimulation {
    pub duration_minutes: i64,
    pub total_amount: Decimal,
    pub breakdown: Vec<SegmentCharge>,
}

impl FeeSimulation {
    pub fn zero() -> Self {
        Self {
            duration_minutes: 0,
            total_amount: Decimal::new(0, 2),
            breakdown: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_payload_deserialization() {
        let raw = serde_json::json!({
            "name": "daytime",
            "type": "tiered",
            "unit_minutes": 30,
            "free_minutes": 30,
            "max_charge": "20",
            "tiers": [
                {"start_minute": 0, "end_minute": 120, "unit_price": "2"},
                {"start_minute": 120, "unit_price": "3"}
            ],
            "time_window": {"start": "08:00", "end": "20:00"}
        });
        let segment: RuleSegment = serde_json::from_value(raw).unwrap();
        assert_eq!(segment.kind.type_name(), "tiered");
        assert_eq!(segment.timezone_name(), DEFAULT_TIMEZONE);
        match &segment.kind {
            SegmentKind::Tiered { tiers, free_minutes, .. } => {
                assert_eq!(tiers.len(), 2);
                assert_eq!(*free_minutes, 30);
                assert!(tiers[1].end_minute.is_none());
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_free_segment_deserialization() {
        let segment: RuleSegment =
            serde_json::from_value(serde_json::json!({"type": "free"})).unwrap();
        assert_eq!(segment.kind, SegmentKind::Free);
        assert_eq!(segment.display_name(0), "segment_1");
    }

    #[test]
    fn test_window_default_timezone() {
        let window: TimeWindow =
            serde_json::from_value(serde_json::json!({"start": "08:00", "end": "20:00"})).unwrap();
        assert_eq!(window.timezone, DEFAULT_TIMEZONE);
    }
}
