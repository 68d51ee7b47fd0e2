//! Time-window billing simulation
//!
//! A rule is an ordered list of segments; earlier segments claim overlapping
//! minutes first. Each segment may be free, periodic (flat unit price) or
//! tiered (unit price by elapsed chargeable minutes), optionally restricted
//! to a daily time window and weekday set in a named timezone.

mod engine;
mod intervals;
mod schema;

pub use engine::{simulate_fee, BillingError};
pub use schema::{FeeSimulation, PriceTier, RuleSegment, SegmentCharge, SegmentKind, TimeWindow};
