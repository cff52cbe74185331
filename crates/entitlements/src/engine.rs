//! Entitlement engine
//!
//! Explicitly constructed facade over policy, clock, store, evaluator and
//! prompt scheduler. Build one at service start and pass it (or clones of
//! it, which share state) to whatever needs feature gating.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lusotown_shared::{FeatureKey, Limit, Tier, UserId};
use serde::{Deserialize, Serialize};

use crate::clock::UsageClock;
use crate::config::{BackendConfig, EngineConfig};
use crate::error::EntitlementResult;
use crate::evaluator::{AccessDecision, AccessEvaluator, DenyReason, Remaining};
use crate::memory::MemoryBackend;
use crate::policy::TierPolicy;
use crate::postgres::PgBackend;
use crate::prompt::{UpgradePrompt, UpgradePromptScheduler};
use crate::store::{CounterBackend, EntitlementStore};
use crate::urgency::{classify_decision, UrgencyLevel};

/// Decision plus what, if anything, to show the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub decision: AccessDecision,
    pub urgency: UrgencyLevel,
    pub prompt: Option<UpgradePrompt>,
}

/// One row of a usage dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureUsage {
    pub feature: FeatureKey,
    pub used: Option<u64>,
    pub limit: Limit,
    pub remaining: Remaining,
    pub reset_at: Option<DateTime<Utc>>,
    pub urgency: UrgencyLevel,
    pub unavailable: bool,
}

#[derive(Clone)]
pub struct EntitlementEngine {
    policy: Arc<TierPolicy>,
    clock: Arc<UsageClock>,
    store: EntitlementStore,
    evaluator: AccessEvaluator,
    prompts: Arc<UpgradePromptScheduler>,
}

impl EntitlementEngine {
    /// Every counter store call is bounded by `store_timeout`
    pub fn new(
        policy: TierPolicy,
        backend: Arc<dyn CounterBackend>,
        clock: UsageClock,
        store_timeout: Duration,
    ) -> Self {
        let policy = Arc::new(policy);
        let clock = Arc::new(clock);
        let store = EntitlementStore::new(backend, Arc::clone(&clock), store_timeout);
        let evaluator = AccessEvaluator::new(Arc::clone(&policy), store.clone(), Arc::clone(&clock));

        Self {
            policy,
            clock,
            store,
            evaluator,
            prompts: Arc::new(UpgradePromptScheduler::new()),
        }
    }

    /// In-memory engine on the system clock with default limits
    pub fn in_memory(config: &EngineConfig) -> Self {
        Self::new(
            TierPolicy::with_overrides(&config.limit_overrides),
            Arc::new(MemoryBackend::new()),
            UsageClock::new(config.timezone),
            config.store_timeout,
        )
    }

    /// Build the engine described by `config`, connecting to and migrating
    /// the database when the Postgres backend is selected
    pub async fn from_config(config: &EngineConfig) -> EntitlementResult<Self> {
        let backend: Arc<dyn CounterBackend> = match &config.backend {
            BackendConfig::Memory => Arc::new(MemoryBackend::new()),
            BackendConfig::Postgres {
                database_url,
                max_connections,
            } => {
                let pool = lusotown_shared::create_pool(database_url, *max_connections).await?;
                lusotown_shared::run_migrations(&pool).await?;
                Arc::new(PgBackend::new(pool))
            }
        };

        tracing::info!(
            backend = backend.name(),
            timezone = %config.timezone,
            store_timeout_ms = config.store_timeout.as_millis() as u64,
            overrides = config.limit_overrides.len(),
            "Entitlement engine initialized"
        );

        Ok(Self::new(
            TierPolicy::with_overrides(&config.limit_overrides),
            backend,
            UsageClock::new(config.timezone),
            config.store_timeout,
        ))
    }

    pub fn policy(&self) -> &TierPolicy {
        &self.policy
    }

    pub fn clock(&self) -> &UsageClock {
        &self.clock
    }

    pub fn store(&self) -> &EntitlementStore {
        &self.store
    }

    pub fn prompts(&self) -> &UpgradePromptScheduler {
        &self.prompts
    }

    pub async fn evaluate(&self, user_id: UserId, tier: Tier, feature: FeatureKey) -> AccessDecision {
        self.evaluator.evaluate(user_id, tier, feature).await
    }

    pub async fn attempt(&self, user_id: UserId, tier: Tier, feature: FeatureKey) -> AccessDecision {
        self.evaluator.attempt(user_id, tier, feature).await
    }

    pub async fn attempt_units(
        &self,
        user_id: UserId,
        tier: Tier,
        feature: FeatureKey,
        units: u64,
    ) -> EntitlementResult<AccessDecision> {
        self.evaluator.attempt_units(user_id, tier, feature, units).await
    }

    /// Attempt the feature, then classify the result and decide whether to
    /// prompt for an upgrade
    pub async fn gate(&self, user_id: UserId, tier: Tier, feature: FeatureKey) -> GateOutcome {
        let decision = self.attempt(user_id, tier, feature).await;
        self.outcome_for(user_id, tier, decision).await
    }

    /// Classify an existing decision and schedule a prompt for it
    pub async fn outcome_for(&self, user_id: UserId, tier: Tier, decision: AccessDecision) -> GateOutcome {
        let urgency = classify_decision(&decision);

        // A storage outage is not the user's quota problem
        let prompt = if decision.deny_reason == Some(DenyReason::Unavailable) {
            None
        } else if self.prompts.should_prompt(user_id, decision.feature, urgency).await {
            let suggested_tier = self.policy.upgrade_target(tier, decision.feature);
            tracing::info!(
                user_id = %user_id,
                tier = %tier,
                feature = %decision.feature,
                urgency = %urgency,
                suggested_tier = ?suggested_tier,
                "Upgrade prompt due"
            );
            Some(UpgradePrompt {
                feature: decision.feature,
                level: urgency,
                deny_reason: decision.deny_reason,
                suggested_tier,
                reset_at: decision.reset_at,
            })
        } else {
            None
        };

        GateOutcome {
            decision,
            urgency,
            prompt,
        }
    }

    /// Read-only snapshot of every feature for a usage dashboard
    pub async fn usage_overview(&self, user_id: UserId, tier: Tier) -> Vec<FeatureUsage> {
        let mut rows = Vec::with_capacity(FeatureKey::ALL.len());
        for feature in FeatureKey::ALL {
            let decision = self.evaluate(user_id, tier, feature).await;
            rows.push(FeatureUsage {
                feature,
                used: decision.used,
                limit: decision.limit,
                remaining: decision.remaining,
                reset_at: decision.reset_at,
                urgency: classify_decision(&decision),
                unavailable: decision.deny_reason == Some(DenyReason::Unavailable),
            });
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualTime, TimeSource};

    fn engine() -> EntitlementEngine {
        let start = DateTime::parse_from_rfc3339("2025-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let config = EngineConfig::default();
        EntitlementEngine::new(
            TierPolicy::default(),
            Arc::new(MemoryBackend::new()),
            UsageClock::with_source(config.timezone, TimeSource::Manual(ManualTime::new(start))),
            config.store_timeout,
        )
    }

    #[tokio::test]
    async fn test_gate_prompts_on_escalation() {
        let engine = engine();
        let user = UserId::new();

        // Free tier: 3 messages/month -> remaining 2 (normal), 1 (high), 0 (critical)
        let first = engine.gate(user, Tier::Free, FeatureKey::SendMessage).await;
        assert!(first.decision.allowed);
        assert_eq!(first.urgency, UrgencyLevel::Normal);
        assert!(first.prompt.is_none());

        let second = engine.gate(user, Tier::Free, FeatureKey::SendMessage).await;
        assert_eq!(second.urgency, UrgencyLevel::High);
        let prompt = second.prompt.unwrap();
        assert_eq!(prompt.suggested_tier, Some(Tier::Community));
        assert_eq!(prompt.deny_reason, None);

        let third = engine.gate(user, Tier::Free, FeatureKey::SendMessage).await;
        assert!(third.decision.allowed);
        assert_eq!(third.urgency, UrgencyLevel::Critical);
        assert!(third.prompt.is_some());

        let fourth = engine.gate(user, Tier::Free, FeatureKey::SendMessage).await;
        assert!(!fourth.decision.allowed);
        let prompt = fourth.prompt.unwrap();
        assert_eq!(prompt.level, UrgencyLevel::Critical);
        assert_eq!(prompt.deny_reason, Some(DenyReason::LimitReached));
        assert!(prompt.reset_at.is_some());
    }

    #[tokio::test]
    async fn test_gate_tier_insufficient_suggests_upgrade() {
        let engine = engine();
        let outcome = engine
            .gate(UserId::new(), Tier::Community, FeatureKey::AccessPremiumEvent)
            .await;

        assert!(!outcome.decision.allowed);
        let prompt = outcome.prompt.unwrap();
        assert_eq!(prompt.deny_reason, Some(DenyReason::TierInsufficient));
        assert_eq!(prompt.suggested_tier, Some(Tier::Ambassador));
        assert_eq!(prompt.reset_at, None);
    }

    #[tokio::test]
    async fn test_unlimited_gate_never_prompts() {
        let engine = engine();
        let user = UserId::new();
        for _ in 0..10 {
            let outcome = engine.gate(user, Tier::Ambassador, FeatureKey::CreateMatch).await;
            assert!(outcome.decision.allowed);
            assert!(outcome.prompt.is_none());
        }
        assert_eq!(engine.prompts().tracked().await, 0);
    }

    #[tokio::test]
    async fn test_usage_overview() {
        let engine = engine();
        let user = UserId::new();
        engine.attempt(user, Tier::Free, FeatureKey::CreateMatch).await;

        let overview = engine.usage_overview(user, Tier::Free).await;
        assert_eq!(overview.len(), 4);

        let matches = overview
            .iter()
            .find(|row| row.feature == FeatureKey::CreateMatch)
            .unwrap();
        assert_eq!(matches.used, Some(1));
        assert_eq!(matches.remaining, Remaining::Count(1));
        assert_eq!(matches.urgency, UrgencyLevel::High);

        let events = overview
            .iter()
            .find(|row| row.feature == FeatureKey::AccessPremiumEvent)
            .unwrap();
        assert_eq!(events.used, None);
        assert_eq!(events.limit, Limit::Limited(0));

        // Dashboard reads must not consume quota
        let again = engine.usage_overview(user, Tier::Free).await;
        assert_eq!(overview, again);
    }

    #[tokio::test]
    async fn test_in_memory_applies_overrides() {
        let config = EngineConfig {
            limit_overrides: vec![crate::config::LimitOverride {
                tier: Tier::Free,
                feature: FeatureKey::CreateMatch,
                limit: Limit::Limited(1),
            }],
            timezone: chrono_tz::Europe::Lisbon,
            ..EngineConfig::default()
        };
        let engine = EntitlementEngine::in_memory(&config);
        assert_eq!(engine.clock().timezone(), chrono_tz::Europe::Lisbon);
        let user = UserId::new();

        assert!(engine.attempt(user, Tier::Free, FeatureKey::CreateMatch).await.allowed);
        assert!(!engine.attempt(user, Tier::Free, FeatureKey::CreateMatch).await.allowed);
    }

    #[tokio::test]
    async fn test_from_config_memory_backend() {
        let engine = EntitlementEngine::from_config(&EngineConfig::default()).await.unwrap();
        assert_eq!(engine.store().backend_name(), "memory");
    }
}
