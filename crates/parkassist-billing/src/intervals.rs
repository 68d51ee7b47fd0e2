//! Half-open UTC interval arithmetic for segment occupancy

use chrono::{DateTime, Utc};

pub type Interval = (DateTime<Utc>, DateTime<Utc>);

/// Merge overlapping or touching intervals into a sorted disjoint set.
pub fn merge_intervals(intervals: &[Interval]) -> Vec<Interval> {
    if intervals.is_empty() {
        return Vec::new();
    }
    let mut sorted = intervals.to_vec();
    sorted.sort_by_key(|item| item.0);

    let mut merged = vec![sorted[0]];
    for (start, end) in sorted.into_iter().skip(1) {
        let last = merged.last_mut().expect("merged is non-empty");
        if start <= last.1 {
            last.1 = last.1.max(end);
        } else {
            merged.push((start, end));
        }
    }
    merged
}

/// Subtract `covered` from `intervals`, keeping only uncovered stretches.
pub fn subtract_intervals(intervals: &[Interval], covered: &[Interval]) -> Vec<Interval> {
    if intervals.is_empty() {
        return Vec::new();
    }
    if covered.is_empty() {
        return intervals.to_vec();
    }

    let covered_merged = merge_intervals(covered);
    let mut result = Vec::new();
    for &(start, end) in intervals {
        let mut cursor = start;
        for &(cover_start, cover_end) in &covered_merged {
            if cover_end <= cursor {
                continue;
            }
            if cover_start >= end {
                break;
            }
            if cover_start > cursor {
                result.push((cursor, cover_start.min(end)));
            }
            cursor = cursor.max(cover_end);
            if cursor >= end {
                break;
            }
        }
        if cursor < end {
            result.push((cursor, end));
        }
    }
    result
}

/// Minute points inside `[start, end) ∩ [origin, overall_end)`, aligned to
/// whole-minute offsets from `origin`.
pub fn iter_minute_points(
    origin: DateTime<Utc>,
    overall_end: DateTime<Utc>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> impl Iterator<Item = DateTime<Utc>> {
    let step = chrono::Duration::minutes(1);
    let mut point = if start >= end {
        overall_end
    } else {
        let offset_seconds = (start - origin).num_seconds();
        let n = offset_seconds.div_euclid(60) + i64::from(offset_seconds.rem_euclid(60) != 0);
        origin + chrono::Duration::minutes(n.max(0))
    };

    std::iter::from_fn(move || {
        if point < end && point < overall_end {
            let current = point;
            point += step;
            Some(current)
        } else {
            None
        }
    })
}
