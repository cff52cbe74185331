//! Access evaluator
//!
//! Answers "may this user do this now?" for a rate-limited feature.
//!
//! Decision order:
//! 1. Unlimited for the tier: allow without touching the counter store.
//! 2. Zero allowance for the tier: deny with `tier_insufficient`, store untouched.
//! 3. Otherwise consult the store; `attempt` checks and consumes in one
//!    atomic backend operation.
//!
//! Any store failure or timeout is a denial with `unavailable`; the evaluator
//! never grants access it could not account for.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lusotown_shared::{FeatureKey, Limit, Tier, UserId};
use serde::{Deserialize, Serialize};

use crate::clock::UsageClock;
use crate::error::{EntitlementError, EntitlementResult, StoreError};
use crate::policy::TierPolicy;
use crate::store::{EntitlementStore, IncrementOutcome};

/// Quota left in the current period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Remaining {
    Count(u64),
    Unlimited,
}

impl Remaining {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Count(0))
    }
}

/// Why an attempt was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Quota for the current period is used up; it returns at `reset_at`
    LimitReached,
    /// The tier does not include the feature at all; only upgrading helps
    TierInsufficient,
    /// Usage could not be determined (storage failure); retry later
    Unavailable,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LimitReached => write!(f, "limit_reached"),
            Self::TierInsufficient => write!(f, "tier_insufficient"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Outcome of an access check. The single source of truth for gating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub feature: FeatureKey,
    pub allowed: bool,
    pub remaining: Remaining,
    pub limit: Limit,
    /// Units consumed this period, when the store was consulted
    pub used: Option<u64>,
    /// When quota comes back; `None` if it never resets or waiting won't help
    pub reset_at: Option<DateTime<Utc>>,
    pub deny_reason: Option<DenyReason>,
}

impl AccessDecision {
    fn unlimited(feature: FeatureKey) -> Self {
        Self {
            feature,
            allowed: true,
            remaining: Remaining::Unlimited,
            limit: Limit::Unlimited,
            used: None,
            reset_at: None,
            deny_reason: None,
        }
    }

    fn tier_insufficient(feature: FeatureKey) -> Self {
        Self {
            feature,
            allowed: false,
            remaining: Remaining::Count(0),
            limit: Limit::Limited(0),
            used: None,
            reset_at: None,
            deny_reason: Some(DenyReason::TierInsufficient),
        }
    }

    fn unavailable(feature: FeatureKey, limit: Limit) -> Self {
        Self {
            feature,
            allowed: false,
            remaining: Remaining::Count(0),
            limit,
            used: None,
            reset_at: None,
            deny_reason: Some(DenyReason::Unavailable),
        }
    }

    fn counted(
        feature: FeatureKey,
        limit: u64,
        used: u64,
        allowed: bool,
        reset_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            feature,
            allowed,
            remaining: Remaining::Count(limit.saturating_sub(used)),
            limit: Limit::Limited(limit),
            used: Some(used),
            reset_at,
            deny_reason: (!allowed).then_some(DenyReason::LimitReached),
        }
    }
}

/// Access evaluator service
#[derive(Clone)]
pub struct AccessEvaluator {
    policy: Arc<TierPolicy>,
    store: EntitlementStore,
    clock: Arc<UsageClock>,
}

impl AccessEvaluator {
    pub fn new(policy: Arc<TierPolicy>, store: EntitlementStore, clock: Arc<UsageClock>) -> Self {
        Self {
            policy,
            store,
            clock,
        }
    }

    pub fn policy(&self) -> &TierPolicy {
        &self.policy
    }

    /// Check access without consuming quota
    pub async fn evaluate(&self, user_id: UserId, tier: Tier, feature: FeatureKey) -> AccessDecision {
        let limit = match self.gate_by_tier(tier, feature) {
            Ok(limit) => limit,
            Err(decision) => return decision,
        };

        let now = self.clock.now();
        match self.store.get_usage_at(user_id, feature, now).await {
            Ok(counter) => {
                let allowed = counter.count < limit;
                AccessDecision::counted(feature, limit, counter.count, allowed, self.reset_at(feature, now))
            }
            Err(e) => self.fail_closed(user_id, tier, feature, limit, e),
        }
    }

    /// Check access and consume one unit if allowed, atomically
    pub async fn attempt(&self, user_id: UserId, tier: Tier, feature: FeatureKey) -> AccessDecision {
        self.consume(user_id, tier, feature, 1).await
    }

    /// Check access and consume `units` (e.g. livestream minutes) if the
    /// whole amount fits in the remaining quota. All or nothing.
    pub async fn attempt_units(
        &self,
        user_id: UserId,
        tier: Tier,
        feature: FeatureKey,
        units: u64,
    ) -> EntitlementResult<AccessDecision> {
        if units == 0 {
            return Err(EntitlementError::InvalidInput(
                "units to consume must be at least 1".to_string(),
            ));
        }
        Ok(self.consume(user_id, tier, feature, units).await)
    }

    async fn consume(&self, user_id: UserId, tier: Tier, feature: FeatureKey, units: u64) -> AccessDecision {
        let limit = match self.gate_by_tier(tier, feature) {
            Ok(limit) => limit,
            Err(decision) => return decision,
        };

        let now = self.clock.now();
        let outcome = match self
            .store
            .increment_within(user_id, feature, limit, units, now)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return self.fail_closed(user_id, tier, feature, limit, e),
        };

        let reset_at = self.reset_at(feature, now);
        match outcome {
            IncrementOutcome::Applied(counter) => {
                tracing::debug!(
                    user_id = %user_id,
                    feature = %feature,
                    units,
                    used = counter.count,
                    limit,
                    period = %counter.period_key,
                    "Feature usage granted"
                );
                AccessDecision::counted(feature, limit, counter.count, true, reset_at)
            }
            IncrementOutcome::Rejected(counter) => {
                tracing::info!(
                    user_id = %user_id,
                    tier = %tier,
                    feature = %feature,
                    units,
                    used = counter.count,
                    limit,
                    "Feature usage denied: limit reached"
                );
                AccessDecision::counted(feature, limit, counter.count, false, reset_at)
            }
        }
    }

    /// Resolve the tier's limit, short-circuiting the cases that never touch
    /// the store: unlimited (allow) and zero (tier insufficient).
    fn gate_by_tier(&self, tier: Tier, feature: FeatureKey) -> Result<u64, AccessDecision> {
        match self.policy.limit_for(tier, feature) {
            Limit::Unlimited => Err(AccessDecision::unlimited(feature)),
            Limit::Limited(0) => {
                tracing::info!(
                    tier = %tier,
                    feature = %feature,
                    "Feature not included in tier"
                );
                Err(AccessDecision::tier_insufficient(feature))
            }
            Limit::Limited(n) => Ok(n),
        }
    }

    fn reset_at(&self, feature: FeatureKey, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.clock.next_reset_at(feature.period_type(), now)
    }

    fn fail_closed(
        &self,
        user_id: UserId,
        tier: Tier,
        feature: FeatureKey,
        limit: u64,
        error: StoreError,
    ) -> AccessDecision {
        tracing::error!(
            user_id = %user_id,
            tier = %tier,
            feature = %feature,
            backend = self.store.backend_name(),
            error = %error,
            "Usage store unavailable; denying access"
        );
        AccessDecision::unavailable(feature, Limit::Limited(limit))
    }
}
