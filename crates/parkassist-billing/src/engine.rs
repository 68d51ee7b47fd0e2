//! Fee simulation over an ordered segment payload

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

use crate::intervals::{iter_minute_points, merge_intervals, subtract_intervals, Interval};
use crate::schema::{FeeSimulation, PriceTier, RuleSegment, SegmentCharge, SegmentKind};

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("invalid time window value: {0}")]
    InvalidTimeWindow(String),
}

fn quantize(value: Decimal) -> Decimal {
    let mut quantized = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    quantized.rescale(2);
    quantized
}

fn parse_hhmm(value: &str) -> Result<u32, BillingError> {
    let (hours, minutes) = value
        .split_once(':')
        .ok_or_else(|| BillingError::InvalidTimeWindow(value.to_string()))?;
    let hours: u32 = hours
        .parse()
        .map_err(|_| BillingError::InvalidTimeWindow(value.to_string()))?;
    let minutes: u32 = minutes
        .parse()
        .map_err(|_| BillingError::InvalidTimeWindow(value.to_string()))?;
    if hours > 23 || minutes > 59 {
        return Err(BillingError::InvalidTimeWindow(value.to_string()));
    }
    Ok(hours * 60 + minutes)
}

fn load_timezone(name: &str) -> Result<Tz, BillingError> {
    Tz::from_str(name).map_err(|_| BillingError::UnknownTimezone(name.to_string()))
}

/// Local wall-clock instant `minute_of_day` minutes into `date`, resolved in
/// `tz`. Ambiguous local times resolve to the earlier offset.
fn local_instant(tz: Tz, date: NaiveDate, minute_of_day: u32) -> Option<DateTime<Tz>> {
    let time = date.and_hms_opt(minute_of_day / 60, minute_of_day % 60, 0)?;
    tz.from_local_datetime(&time).earliest()
}

fn build_segment_candidate_intervals(
    segment: &RuleSegment,
    entry_time: DateTime<Utc>,
    exit_time: DateTime<Utc>,
) -> Result<Vec<Interval>, BillingError> {
    let tz = load_timezone(segment.timezone_name())?;
    let local_entry = entry_time.with_timezone(&tz);
    let local_exit = exit_time.with_timezone(&tz);

    let window_minutes = match &segment.time_window {
        Some(window) => Some((parse_hhmm(&window.start)?, parse_hhmm(&window.end)?)),
        None => None,
    };

    let mut candidates: Vec<Interval> = Vec::new();
    let mut date = local_entry.date_naive();
    let last_date = local_exit.date_naive();

    while date <= last_date {
        let next_date = date
            .succ_opt()
            .ok_or_else(|| BillingError::InvalidTimeWindow("date overflow".into()))?;

        if let Some(weekdays) = &segment.weekdays {
            if !weekdays.contains(&date.weekday().number_from_monday()) {
                date = next_date;
                continue;
            }
        }

        let (Some(day_start), Some(next_day_start)) =
            (local_instant(tz, date, 0), local_instant(tz, next_date, 0))
        else {
            date = next_date;
            continue;
        };

        let day_intervals: Vec<(DateTime<Tz>, DateTime<Tz>)> = match window_minutes {
            None => vec![(day_start, next_day_start)],
            Some((start_minute, end_minute)) if start_minute == end_minute => {
                vec![(day_start, next_day_start)]
            }
            Some((start_minute, end_minute)) if start_minute < end_minute => {
                match (
                    local_instant(tz, date, start_minute),
                    local_instant(tz, date, end_minute),
                ) {
                    (Some(start), Some(end)) => vec![(start, end)],
                    _ => Vec::new(),
                }
            }
            Some((start_minute, end_minute)) => {
                // Wrapping window: the day contributes its head and tail.
                let mut parts = Vec::new();
                if let Some(end) = local_instant(tz, date, end_minute) {
                    parts.push((day_start, end));
                }
                if let Some(start) = local_instant(tz, date, start_minute) {
                    parts.push((start, next_day_start));
                }
                parts
            }
        };

        for (local_start, local_end) in day_intervals {
            let clipped_start = local_start.max(local_entry);
            let clipped_end = local_end.min(local_exit);
            if clipped_start >= clipped_end {
                continue;
            }
            candidates.push((
                clipped_start.with_timezone(&Utc),
                clipped_end.with_timezone(&Utc),
            ));
        }

        date = next_date;
    }

    Ok(merge_intervals(&candidates))
}

type SegmentMinutes = BTreeMap<usize, u64>;
type SegmentDayMinutes = BTreeMap<usize, BTreeMap<NaiveDate, u64>>;

/// Attribute every minute of `[entry, exit)` to at most one segment, in
/// payload order, bucketed by the segment's local date.
fn collect_segment_minutes(
    payload: &[RuleSegment],
    entry_time: DateTime<Utc>,
    exit_time: DateTime<Utc>,
) -> Result<(SegmentMinutes, SegmentDayMinutes), BillingError> {
    let mut segment_minutes = SegmentMinutes::new();
    let mut segment_day_minutes = SegmentDayMinutes::new();
    let mut covered_intervals: Vec<Interval> = Vec::new();

    for (index, segment) in payload.iter().enumerate() {
        let candidates = build_segment_candidate_intervals(segment, entry_time, exit_time)?;
        let active = subtract_intervals(&candidates, &covered_intervals);
        if active.is_empty() {
            continue;
        }

        let tz = load_timezone(segment.timezone_name())?;
        let day_map = segment_day_minutes.entry(index).or_default();
        for &(interval_start, interval_end) in &active {
            for point in iter_minute_points(entry_time, exit_time, interval_start, interval_end) {
                *segment_minutes.entry(index).or_default() += 1;
                let day_key = point.with_timezone(&tz).date_naive();
                *day_map.entry(day_key).or_default() += 1;
            }
        }

        covered_intervals.extend(active);
        covered_intervals = merge_intervals(&covered_intervals);
    }

    Ok((segment_minutes, segment_day_minutes))
}

fn tiered_unit_amount(units: u64, unit_minutes: u32, tiers: &[PriceTier]) -> Decimal {
    let mut amount = Decimal::ZERO;
    for unit_index in 0..units {
        let start_minute = unit_index * u64::from(unit_minutes);
        let unit_price = tiers
            .iter()
            .find(|tier| {
                start_minute >= u64::from(tier.start_minute)
                    && tier
                        .end_minute
                        .map(|end| start_minute < u64::from(end))
                        .unwrap_or(true)
            })
            .map(|tier| tier.unit_price)
            .unwrap_or(Decimal::ZERO);
        amount += unit_price;
    }
    amount
}

fn charge_segment(
    kind: &SegmentKind,
    minutes: u64,
    day_map: &BTreeMap<NaiveDate, u64>,
) -> (Decimal, u64, bool) {
    let (unit_minutes, free_pool, max_charge, tiers, unit_price) = match kind {
        SegmentKind::Free => return (Decimal::ZERO, minutes, false),
        SegmentKind::Periodic {
            unit_minutes,
            unit_price,
            free_minutes,
            max_charge,
        } => (
            (*unit_minutes).max(1),
            u64::from(*free_minutes),
            *max_charge,
            None,
            Some(*unit_price),
        ),
        SegmentKind::Tiered {
            unit_minutes,
            tiers,
            free_minutes,
            max_charge,
        } => (
            (*unit_minutes).max(1),
            u64::from(*free_minutes),
            *max_charge,
            Some(tiers),
            None,
        ),
    };

    let mut amount = Decimal::ZERO;
    let mut remaining_free = free_pool;
    let mut capped = false;

    for day_minutes in day_map.values() {
        let chargeable = day_minutes.saturating_sub(remaining_free);
        remaining_free = remaining_free.saturating_sub(*day_minutes);
        let units = chargeable.div_ceil(u64::from(unit_minutes));

        let mut day_amount = match (tiers, unit_price) {
            (Some(tiers), _) => tiered_unit_amount(units, unit_minutes, tiers),
            (None, Some(unit_price)) => Decimal::from(units) * unit_price,
            (None, None) => Decimal::ZERO,
        };

        if let Some(cap) = max_charge {
            if day_amount >= cap {
                day_amount = cap;
                capped = true;
            }
        }

        amount += day_amount;
    }

    (amount, free_pool, capped)
}

/// Simulate the fee for one stay against an ordered segment payload.
///
/// Daily caps apply per local date; each segment's free-minute pool is drawn
/// down day by day and carries across days within that segment.
pub fn simulate_fee(
    rule_payload: &[RuleSegment],
    entry_time: DateTime<Utc>,
    exit_time: DateTime<Utc>,
) -> Result<FeeSimulation, BillingError> {
    if exit_time <= entry_time {
        return Ok(FeeSimulation::zero());
    }

    let duration_minutes = (exit_time - entry_time).num_seconds() / 60;
    let (segment_minutes, segment_day_minutes) =
        collect_segment_minutes(rule_payload, entry_time, exit_time)?;

    let mut breakdown = Vec::new();
    let mut total_amount = Decimal::ZERO;
    let empty_days = BTreeMap::new();

    for (&segment_index, &minutes) in &segment_minutes {
        let segment = &rule_payload[segment_index];
        let day_map = segment_day_minutes
            .get(&segment_index)
            .unwrap_or(&empty_days);

        let (raw_amount, free_minutes, capped) = charge_segment(&segment.kind, minutes, day_map);
        let amount = quantize(raw_amount);
        total_amount += amount;

        breakdown.push(SegmentCharge {
            segment_name: segment.display_name(segment_index),
            segment_type: segment.kind.type_name().to_string(),
            minutes,
            amount,
            free_minutes,
            capped,
        });
    }

    Ok(FeeSimulation {
        duration_minutes,
        total_amount: quantize(total_amount),
        breakdown,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TimeWindow;
    use chrono_tz::Asia::Shanghai;
    use rust_decimal::prelude::FromPrimitive;

    fn dec(value: f64) -> Decimal {
        Decimal::from_f64(value).unwrap()
    }

    fn shanghai(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Shanghai
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn window(start: &str, end: &str) -> TimeWindow {
        TimeWindow {
            start: start.to_string(),
            end: end.to_string(),
            timezone: "Asia/Shanghai".to_string(),
        }
    }

    fn periodic(
        window_opt: Option<TimeWindow>,
        unit_minutes: u32,
        unit_price: Decimal,
        free_minutes: u32,
        max_charge: Option<Decimal>,
    ) -> RuleSegment {
        RuleSegment {
            name: Some("periodic".into()),
            kind: SegmentKind::Periodic {
                unit_minutes,
                unit_price,
                free_minutes,
                max_charge,
            },
            time_window: window_opt,
            weekdays: None,
        }
    }

    #[test]
    fn test_zero_result_when_exit_not_after_entry() {
        let entry = shanghai(2026, 3, 2, 9, 0);
        let result = simulate_fee(&[], entry, entry).unwrap();
        assert_eq!(result.duration_minutes, 0);
        assert_eq!(result.total_amount, Decimal::new(0, 2));
        assert!(result.breakdown.is_empty());
    }

    #[test]
    fn test_periodic_basic_charge() {
        let payload = vec![periodic(None, 30, dec(2.0), 0, None)];
        let result = simulate_fee(
            &payload,
            shanghai(2026, 3, 2, 9, 0),
            shanghai(2026, 3, 2, 10, 10),
        )
        .unwrap();
        // 70 minutes -> 3 units of 30 minutes.
        assert_eq!(result.duration_minutes, 70);
        assert_eq!(result.total_amount, dec(6.0));
        assert_eq!(result.breakdown[0].minutes, 70);
        assert!(!result.breakdown[0].capped);
    }

    #[test]
    fn test_tiered_with_free_minutes() {
        let payload = vec![RuleSegment {
            name: Some("daytime".into()),
            kind: SegmentKind::Tiered {
                unit_minutes: 30,
                tiers: vec![
                    PriceTier {
                        start_minute: 0,
                        end_minute: Some(120),
                        unit_price: dec(2.0),
                    },
                    PriceTier {
                        start_minute: 120,
                        end_minute: None,
                        unit_price: dec(3.0),
                    },
                ],
                free_minutes: 30,
                max_charge: Some(dec(20.0)),
            },
            time_window: Some(window("08:00", "20:00")),
            weekdays: None,
        }];
        let result = simulate_fee(
            &payload,
            shanghai(2026, 3, 2, 9, 0),
            shanghai(2026, 3, 2, 12, 0),
        )
        .unwrap();
        // 180 min - 30 free = 150 chargeable -> 5 units; unit start minutes
        // 0/30/60/90 hit tier one, 120 hits tier two: 4*2 + 3 = 11.
        assert_eq!(result.duration_minutes, 180);
        assert_eq!(result.total_amount, dec(11.0));
        let charge = &result.breakdown[0];
        assert_eq!(charge.minutes, 180);
        assert_eq!(charge.free_minutes, 30);
        assert!(!charge.capped);
    }

    #[test]
    fn test_cross_day_cap_applies_per_local_date() {
        let payload = vec![periodic(
            Some(window("08:00", "20:00")),
            30,
            dec(2.0),
            0,
            Some(dec(20.0)),
        )];
        let result = simulate_fee(
            &payload,
            shanghai(2026, 3, 2, 9, 0),
            shanghai(2026, 3, 4, 15, 10),
        )
        .unwrap();
        // Each of the three local dates caps at 20.
        assert_eq!(result.total_amount, dec(60.0));
        assert!(result.breakdown[0].capped);
    }

    #[test]
    fn test_earlier_segment_wins_overlap() {
        let payload = vec![
            RuleSegment {
                name: Some("free-morning".into()),
                kind: SegmentKind::Free,
                time_window: Some(window("08:00", "10:00")),
                weekdays: None,
            },
            periodic(None, 60, dec(4.0), 0, None),
        ];
        let result = simulate_fee(
            &payload,
            shanghai(2026, 3, 2, 9, 0),
            shanghai(2026, 3, 2, 11, 0),
        )
        .unwrap();
        // 09:00-10:00 goes to the free segment, 10:00-11:00 to periodic.
        assert_eq!(result.breakdown.len(), 2);
        assert_eq!(result.breakdown[0].segment_type, "free");
        assert_eq!(result.breakdown[0].minutes, 60);
        assert_eq!(result.breakdown[0].free_minutes, 60);
        assert_eq!(result.breakdown[1].minutes, 60);
        assert_eq!(result.total_amount, dec(4.0));

        let attributed: u64 = result.breakdown.iter().map(|c| c.minutes).sum();
        assert_eq!(attributed as i64, result.duration_minutes);

        let amount_sum: Decimal = result.breakdown.iter().map(|c| c.amount).sum();
        assert_eq!(amount_sum, result.total_amount);
    }

    #[test]
    fn test_wrapping_night_window() {
        let payload = vec![periodic(
            Some(window("22:00", "06:00")),
            60,
            dec(1.0),
            0,
            None,
        )];
        let result = simulate_fee(
            &payload,
            shanghai(2026, 3, 2, 21, 0),
            shanghai(2026, 3, 3, 1, 0),
        )
        .unwrap();
        // Only 22:00-01:00 falls inside the night window.
        assert_eq!(result.breakdown[0].minutes, 180);
        assert_eq!(result.total_amount, dec(3.0));
    }

    #[test]
    fn test_free_minutes_carry_across_days() {
        let payload = vec![periodic(
            Some(window("08:00", "09:00")),
            30,
            dec(2.0),
            90,
            None,
        )];
        let result = simulate_fee(
            &payload,
            shanghai(2026, 3, 2, 8, 0),
            shanghai(2026, 3, 3, 9, 0),
        )
        .unwrap();
        // Two window hits of 60 minutes each; 90 free covers day one fully
        // and 30 minutes of day two, leaving one unit.
        assert_eq!(result.breakdown[0].minutes, 120);
        assert_eq!(result.total_amount, dec(2.0));
    }

    #[test]
    fn test_weekday_restriction() {
        // 2026-03-02 is a Monday.
        let mut segment = periodic(Some(window("08:00", "20:00")), 30, dec(2.0), 0, None);
        segment.weekdays = Some(vec![2]);
        let result = simulate_fee(
            &[segment],
            shanghai(2026, 3, 2, 9, 0),
            shanghai(2026, 3, 2, 10, 0),
        )
        .unwrap();
        assert!(result.breakdown.is_empty());
        assert_eq!(result.total_amount, Decimal::new(0, 2));
    }

    #[test]
    fn test_half_up_quantization() {
        // 25 minutes at 1.125 per 5-minute unit: 5 units -> 5.625 -> 5.63.
        let payload = vec![periodic(None, 5, dec(1.125), 0, None)];
        let result = simulate_fee(
            &payload,
            shanghai(2026, 3, 2, 9, 0),
            shanghai(2026, 3, 2, 9, 25),
        )
        .unwrap();
        assert_eq!(result.total_amount.to_string(), "5.63");
    }

    #[test]
    fn test_unknown_timezone_is_error() {
        let payload = vec![periodic(
            Some(TimeWindow {
                start: "08:00".into(),
                end: "20:00".into(),
                timezone: "Mars/Olympus".into(),
            }),
            30,
            dec(2.0),
            0,
            None,
        )];
        let err = simulate_fee(
            &payload,
            shanghai(2026, 3, 2, 9, 0),
            shanghai(2026, 3, 2, 10, 0),
        )
        .unwrap_err();
        assert!(matches!(err, BillingError::UnknownTimezone(_)));
    }

    #[test]
    fn test_invalid_window_is_error() {
        let payload = vec![periodic(Some(window("8am", "20:00")), 30, dec(2.0), 0, None)];
        let err = simulate_fee(
            &payload,
            shanghai(2026, 3, 2, 9, 0),
            shanghai(2026, 3, 2, 10, 0),
        )
        .unwrap_err();
        assert!(matches!(err, BillingError::InvalidTimeWindow(_)));
    }
}
