//! Urgency classification
//!
//! Maps remaining quota to how loudly the UI should nudge the user. Purely
//! derived from the current decision; never persisted and never used for
//! access control.

use lusotown_shared::Limit;
use serde::{Deserialize, Serialize};

use crate::evaluator::{AccessDecision, DenyReason, Remaining};

/// Share of the limit at or below which usage counts as "approaching", in tenths
const APPROACHING_TENTHS: u128 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyLevel {
    Normal,
    Approaching,
    High,
    Critical,
}

impl std::fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Approaching => write!(f, "approaching"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// `ceil(limit * 0.3)` in integer arithmetic
fn approaching_threshold(limit: u64) -> u64 {
    let scaled = (limit as u128 * APPROACHING_TENTHS).div_ceil(10);
    scaled.min(u64::MAX as u128) as u64
}

pub fn classify(remaining: Remaining, limit: Limit) -> UrgencyLevel {
    if remaining.is_exhausted() {
        return UrgencyLevel::Critical;
    }
    let (remaining, limit) = match (remaining, limit) {
        (Remaining::Count(r), Limit::Limited(l)) => (r, l),
        _ => return UrgencyLevel::Normal,
    };

    match remaining {
        1 => UrgencyLevel::High,
        r if r <= approaching_threshold(limit) => UrgencyLevel::Approaching,
        _ => UrgencyLevel::Normal,
    }
}

/// Urgency for a decision. An `unavailable` denial says nothing about the
/// user's quota, so it is never escalated.
pub fn classify_decision(decision: &AccessDecision) -> UrgencyLevel {
    if decision.deny_reason == Some(DenyReason::Unavailable) {
        return UrgencyLevel::Normal;
    }
    classify(decision.remaining, decision.limit)
}
