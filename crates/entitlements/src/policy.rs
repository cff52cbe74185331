//! Tier policy
//!
//! Static mapping from membership tier to per-feature limits. The default
//! table is an exhaustive match, so every (tier, feature) pair resolves to a
//! limit at compile time; operator overrides can only replace entries.

use lusotown_shared::{FeatureKey, Limit, Tier};

use crate::config::LimitOverride;

const TIER_COUNT: usize = Tier::ALL.len();
const FEATURE_COUNT: usize = FeatureKey::ALL.len();

/// Default limit for a (tier, feature) pair
///
/// | feature              | free | community | ambassador |
/// |----------------------|------|-----------|------------|
/// | create_match (day)   | 2    | unlimited | unlimited  |
/// | send_message (month) | 3    | unlimited | unlimited  |
/// | access_premium_event | 0    | 0         | unlimited  |
/// | access_livestream    | 0    | 0         | 300 min/mo |
pub fn default_limit(tier: Tier, feature: FeatureKey) -> Limit {
    match (tier, feature) {
        (Tier::Free, FeatureKey::CreateMatch) => Limit::Limited(2),
        (Tier::Free, FeatureKey::SendMessage) => Limit::Limited(3),
        (Tier::Free, FeatureKey::AccessPremiumEvent) => Limit::Limited(0),
        (Tier::Free, FeatureKey::AccessLivestream) => Limit::Limited(0),

        (Tier::Community, FeatureKey::CreateMatch) => Limit::Unlimited,
        (Tier::Community, FeatureKey::SendMessage) => Limit::Unlimited,
        (Tier::Community, FeatureKey::AccessPremiumEvent) => Limit::Limited(0),
        (Tier::Community, FeatureKey::AccessLivestream) => Limit::Limited(0),

        (Tier::Ambassador, FeatureKey::CreateMatch) => Limit::Unlimited,
        (Tier::Ambassador, FeatureKey::SendMessage) => Limit::Unlimited,
        (Tier::Ambassador, FeatureKey::AccessPremiumEvent) => Limit::Unlimited,
        (Tier::Ambassador, FeatureKey::AccessLivestream) => Limit::Limited(300),
    }
}

fn tier_index(tier: Tier) -> usize {
    tier.rank() as usize
}

fn feature_index(feature: FeatureKey) -> usize {
    match feature {
        FeatureKey::CreateMatch => 0,
        FeatureKey::SendMessage => 1,
        FeatureKey::AccessPremiumEvent => 2,
        FeatureKey::AccessLivestream => 3,
    }
}

/// Immutable per-tier limit table, shared freely across callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierPolicy {
    limits: [[Limit; FEATURE_COUNT]; TIER_COUNT],
}

impl Default for TierPolicy {
    fn default() -> Self {
        let mut limits = [[Limit::Limited(0); FEATURE_COUNT]; TIER_COUNT];
        for tier in Tier::ALL {
            for feature in FeatureKey::ALL {
                limits[tier_index(tier)][feature_index(feature)] = default_limit(tier, feature);
            }
        }
        Self { limits }
    }
}

impl TierPolicy {
    /// Default table with operator overrides applied on top
    pub fn with_overrides(overrides: &[LimitOverride]) -> Self {
        let mut policy = Self::default();
        for o in overrides {
            tracing::info!(
                tier = %o.tier,
                feature = %o.feature,
                default = %default_limit(o.tier, o.feature),
                limit = %o.limit,
                "Applying tier limit override"
            );
            policy.limits[tier_index(o.tier)][feature_index(o.feature)] = o.limit;
        }
        policy
    }

    /// Limit applicable to `tier` for `feature`
    pub fn limit_for(&self, tier: Tier, feature: FeatureKey) -> Limit {
        self.limits[tier_index(tier)][feature_index(feature)]
    }

    /// Lowest tier above `tier` with a more generous limit for `feature`.
    /// `None` means upgrading would not help.
    pub fn upgrade_target(&self, tier: Tier, feature: FeatureKey) -> Option<Tier> {
        let current = self.limit_for(tier, feature);
        tier.higher_tiers()
            .find(|candidate| self.limit_for(*candidate, feature).more_generous_than(&current))
    }

    /// Lowest tier with any access to `feature`
    pub fn minimum_tier_for(&self, feature: FeatureKey) -> Option<Tier> {
        Tier::ALL
            .into_iter()
            .find(|tier| !self.limit_for(*tier, feature).is_zero())
    }
}
