//! Entitlement store
//!
//! Owns every usage counter. Counters are created lazily, roll over lazily
//! on the first read or write after a period boundary, and are only ever
//! mutated through the atomic increment operations below.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lusotown_shared::{FeatureKey, UserId};
use serde::{Deserialize, Serialize};

use crate::clock::{PeriodKey, UsageClock};
use crate::error::{StoreError, StoreResult};

/// Consumed count for one (user, feature) in one period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounter {
    pub user_id: UserId,
    pub feature: FeatureKey,
    pub count: u64,
    pub period_key: PeriodKey,
}

/// Result of a bounded increment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncrementOutcome {
    /// The amount was added; holds the post-increment counter
    Applied(UsageCounter),
    /// Adding the amount would exceed the ceiling; nothing changed
    Rejected(UsageCounter),
}

impl IncrementOutcome {
    pub fn counter(&self) -> &UsageCounter {
        match self {
            Self::Applied(c) | Self::Rejected(c) => c,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Count and key after applying the rollover rule to a stored counter.
///
/// A stored key older than `current` starts a fresh period at zero. A stored
/// key newer than `current` (the wall clock went backwards) is kept as is, so
/// a period is never re-entered once left.
pub fn roll_forward(stored_count: u64, stored_key: &PeriodKey, current: &PeriodKey) -> (u64, PeriodKey) {
    if stored_key < current {
        (0, current.clone())
    } else {
        (stored_count, stored_key.clone())
    }
}

/// Atomic counter storage behind the entitlement store.
///
/// Implementations must apply [`roll_forward`] and the bounded increment as
/// one atomic step per (user, feature); concurrent `add` calls must never
/// both succeed when together they would exceed `ceiling`.
#[async_trait]
pub trait CounterBackend: Send + Sync + 'static {
    /// Load a counter, creating it at zero and rolling it over if stale
    async fn read(
        &self,
        user_id: UserId,
        feature: FeatureKey,
        current: &PeriodKey,
    ) -> StoreResult<UsageCounter>;

    /// Roll over if stale, then add `amount` unless the result would exceed
    /// `ceiling`. `None` means no ceiling.
    async fn add(
        &self,
        user_id: UserId,
        feature: FeatureKey,
        current: &PeriodKey,
        amount: u64,
        ceiling: Option<u64>,
    ) -> StoreResult<IncrementOutcome>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

/// Entitlement store service
#[derive(Clone)]
pub struct EntitlementStore {
    backend: Arc<dyn CounterBackend>,
    clock: Arc<UsageClock>,
    timeout: Duration,
}

impl EntitlementStore {
    pub fn new(backend: Arc<dyn CounterBackend>, clock: Arc<UsageClock>, timeout: Duration) -> Self {
        Self {
            backend,
            clock,
            timeout,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Current usage, rolling the counter over if its period has ended
    pub async fn get_usage(&self, user_id: UserId, feature: FeatureKey) -> StoreResult<UsageCounter> {
        self.get_usage_at(user_id, feature, self.clock.now()).await
    }

    pub async fn get_usage_at(
        &self,
        user_id: UserId,
        feature: FeatureKey,
        now: DateTime<Utc>,
    ) -> StoreResult<UsageCounter> {
        let current = self.clock.current_period_key(feature.period_type(), now);
        self.timed(self.backend.read(user_id, feature, &current)).await
    }

    /// Unconditionally add one use
    pub async fn increment(&self, user_id: UserId, feature: FeatureKey) -> StoreResult<UsageCounter> {
        let current = self.clock.current_period_key(feature.period_type(), self.clock.now());
        let outcome = self
            .timed(self.backend.add(user_id, feature, &current, 1, None))
            .await?;
        Ok(outcome.counter().clone())
    }

    /// Atomically add `amount` only if the period total stays within `limit`
    pub async fn increment_within(
        &self,
        user_id: UserId,
        feature: FeatureKey,
        limit: u64,
        amount: u64,
        now: DateTime<Utc>,
    ) -> StoreResult<IncrementOutcome> {
        let current = self.clock.current_period_key(feature.period_type(), now);
        self.timed(self.backend.add(user_id, feature, &current, amount, Some(limit)))
            .await
    }

    async fn timed<T, F>(&self, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}
