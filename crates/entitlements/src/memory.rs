//! In-memory counter backend
//!
//! Counters live behind a single async mutex, so every read-modify-write is
//! atomic with respect to other callers in the same process. Suitable for
//! development, tests and single-instance deployments; state is lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use lusotown_shared::{FeatureKey, UserId};
use tokio::sync::Mutex;

use crate::clock::PeriodKey;
use crate::error::StoreResult;
use crate::store::{roll_forward, CounterBackend, IncrementOutcome, UsageCounter};

/// Store: (user, feature) -> (count, period_key)
pub struct MemoryBackend {
    counters: Mutex<HashMap<(UserId, FeatureKey), (u64, PeriodKey)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a counter has ever been created for (user, feature)
    pub async fn contains(&self, user_id: UserId, feature: FeatureKey) -> bool {
        self.counters.lock().await.contains_key(&(user_id, feature))
    }

    /// Number of counters held
    pub async fn len(&self) -> usize {
        self.counters.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.counters.lock().await.is_empty()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterBackend for MemoryBackend {
    async fn read(
        &self,
        user_id: UserId,
        feature: FeatureKey,
        current: &PeriodKey,
    ) -> StoreResult<UsageCounter> {
        let mut counters = self.counters.lock().await;
        let entry = counters
            .entry((user_id, feature))
            .or_insert_with(|| (0, current.clone()));

        let (count, period_key) = roll_forward(entry.0, &entry.1, current);
        *entry = (count, period_key.clone());

        Ok(UsageCounter {
            user_id,
            feature,
            count,
            period_key,
        })
    }

    async fn add(
        &self,
        user_id: UserId,
        feature: FeatureKey,
        current: &PeriodKey,
        amount: u64,
        ceiling: Option<u64>,
    ) -> StoreResult<IncrementOutcome> {
        let mut counters = self.counters.lock().await;
        let entry = counters
            .entry((user_id, feature))
            .or_insert_with(|| (0, current.clone()));

        let (count, period_key) = roll_forward(entry.0, &entry.1, current);
        let proposed = count.saturating_add(amount);
        let allowed = ceiling.map_or(true, |c| proposed <= c);

        let new_count = if allowed { proposed } else { count };
        *entry = (new_count, period_key.clone());

        let counter = UsageCounter {
            user_id,
            feature,
            count: new_count,
            period_key,
        };

        if allowed {
            Ok(IncrementOutcome::Applied(counter))
        } else {
            Ok(IncrementOutcome::Rejected(counter))
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_add_without_ceiling() {
        let backend = MemoryBackend::new();
        let user = UserId::new();
        let key = PeriodKey::new("2025-05");

        for expected in 1..=5 {
            let outcome = backend
                .add(user, FeatureKey::SendMessage, &key, 1, None)
                .await
                .unwrap();
            assert!(outcome.is_applied());
            assert_eq!(outcome.counter().count, expected);
        }
    }

    #[tokio::test]
    async fn test_rejected_add_leaves_count_unchanged() {
        let backend = MemoryBackend::new();
        let user = UserId::new();
        let key = PeriodKey::new("2025-05-01");

        backend.add(user, FeatureKey::CreateMatch, &key, 2, Some(2)).await.unwrap();
        let outcome = backend
            .add(user, FeatureKey::CreateMatch, &key, 1, Some(2))
            .await
            .unwrap();
        assert_eq!(outcome, IncrementOutcome::Rejected(UsageCounter {
            user_id: user,
            feature: FeatureKey::CreateMatch,
            count: 2,
            period_key: key.clone(),
        }));
    }

    #[tokio::test]
    async fn test_stale_period_is_rolled_before_ceiling_check() {
        let backend = MemoryBackend::new();
        let user = UserId::new();

        backend
            .add(user, FeatureKey::CreateMatch, &PeriodKey::new("2025-05-01"), 2, Some(2))
            .await
            .unwrap();
        let outcome = backend
            .add(user, FeatureKey::CreateMatch, &PeriodKey::new("2025-05-02"), 1, Some(2))
            .await
            .unwrap();
        assert!(outcome.is_applied());
        assert_eq!(outcome.counter().count, 1);
        assert_eq!(outcome.counter().period_key.as_str(), "2025-05-02");
    }

    #[tokio::test]
    async fn test_older_period_key_does_not_reset() {
        let backend = MemoryBackend::new();
        let user = UserId::new();

        backend
            .add(user, FeatureKey::CreateMatch, &PeriodKey::new("2025-05-02"), 2, None)
            .await
            .unwrap();
        let counter = backend
            .read(user, FeatureKey::CreateMatch, &PeriodKey::new("2025-05-01"))
            .await
            .unwrap();
        assert_eq!(counter.count, 2);
        assert_eq!(counter.period_key.as_str(), "2025-05-02");
    }

    #[tokio::test]
    async fn test_separate_keys() {
        let backend = MemoryBackend::new();
        let user_1 = UserId::new();
        let user_2 = UserId::new();
        let key = PeriodKey::new("2025-05-01");

        backend.add(user_1, FeatureKey::CreateMatch, &key, 2, Some(2)).await.unwrap();

        let blocked = backend.add(user_1, FeatureKey::CreateMatch, &key, 1, Some(2)).await.unwrap();
        assert!(!blocked.is_applied());

        let other_user = backend.add(user_2, FeatureKey::CreateMatch, &key, 1, Some(2)).await.unwrap();
        assert!(other_user.is_applied());

        let other_feature = backend.add(user_1, FeatureKey::SendMessage, &key, 1, Some(2)).await.unwrap();
        assert!(other_feature.is_applied());

        assert_eq!(backend.len().await, 3);
    }

    #[tokio::test]
    async fn test_concurrent_adds_never_exceed_ceiling() {
        let backend = Arc::new(MemoryBackend::new());
        let user = UserId::new();
        let key = PeriodKey::new("2025-05-01");

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let backend = Arc::clone(&backend);
                let key = key.clone();
                tokio::spawn(async move {
                    backend
                        .add(user, FeatureKey::CreateMatch, &key, 1, Some(10))
                        .await
                        .unwrap()
                        .is_applied()
                })
            })
            .collect();

        let mut applied = 0;
        for handle in handles {
            if handle.await.unwrap() {
                applied += 1;
            }
        }
        assert_eq!(applied, 10);
        let counter = backend.read(user, FeatureKey::CreateMatch, &key).await.unwrap();
        assert_eq!(counter.count, 10);
    }
}
