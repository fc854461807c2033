//! # Weight Model
//!
//! The single authoritative home of the weight formulas. Everything that
//! blends or decays edge weights goes through these functions; no other
//! module restates the shares or the half-life curve.

use chrono::{DateTime, Utc};

use crate::primitives::{RECENCY_FLOOR, RECENCY_HALF_LIFE_DAYS};

/// Share of the semantic component in the combined weight.
pub const SEMANTIC_SHARE: f64 = 0.55;

/// Share of the structural component in the combined weight.
pub const STRUCTURAL_SHARE: f64 = 0.25;

/// Share of the recency component in the combined weight.
pub const RECENCY_SHARE: f64 = 0.10;

/// Share of the usage component in the combined weight.
pub const USAGE_SHARE: f64 = 0.10;

/// Clamp a value into [0, 1].
#[must_use]
pub fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Blend the four weight components into the combined scalar.
///
/// `combined = clamp01(0.55·semantic + 0.25·structural + 0.10·recency
/// + 0.10·usage)`.
#[must_use]
pub fn combine(structural: f64, semantic: f64, recency: f64, usage: f64) -> f64 {
    clamp01(
        SEMANTIC_SHARE * semantic
            + STRUCTURAL_SHARE * structural
            + RECENCY_SHARE * recency
            + USAGE_SHARE * usage,
    )
}

/// Recency weight after `days` days without reinforcement.
///
/// Exponential decay with a 7-day half-life, floored at 0.1 so old
/// edges stay faintly visible rather than vanishing.
#[must_use]
pub fn recency_weight(days: f64) -> f64 {
    let days = days.max(0.0);
    let decayed = (-std::f64::consts::LN_2 * days / RECENCY_HALF_LIFE_DAYS).exp();
    decayed.max(RECENCY_FLOOR)
}

/// Fractional days elapsed between two timestamps, floored at zero.
#[must_use]
pub fn days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let secs = (later - earlier).num_seconds();
    if secs <= 0 {
        0.0
    } else {
        secs as f64 / 86_400.0
    }
}
