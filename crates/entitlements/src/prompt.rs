//! Upgrade prompt scheduling
//!
//! Remembers the last urgency level shown per (user, feature) so the same
//! state does not re-alert. Only pairs currently above `normal` are held, so
//! unlimited and lightly used features cost nothing. Advisory only: losing
//! this state means a redundant prompt, never a wrong access decision.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use lusotown_shared::{FeatureKey, Tier, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::evaluator::DenyReason;
use crate::urgency::UrgencyLevel;

/// What the UI should show when a prompt is due
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradePrompt {
    pub feature: FeatureKey,
    pub level: UrgencyLevel,
    pub deny_reason: Option<DenyReason>,
    /// Lowest tier that would help; `None` when upgrading would not
    pub suggested_tier: Option<Tier>,
    pub reset_at: Option<DateTime<Utc>>,
}

/// Upgrade prompt scheduler
pub struct UpgradePromptScheduler {
    last_shown: Mutex<HashMap<(UserId, FeatureKey), UrgencyLevel>>,
}

impl UpgradePromptScheduler {
    pub fn new() -> Self {
        Self {
            last_shown: Mutex::new(HashMap::new()),
        }
    }

    /// Whether to prompt for `level` now. Prompts on any change of level and
    /// always on `critical`. `normal` never prompts and clears the stored
    /// level, so the next escalation prompts again.
    pub async fn should_prompt(&self, user_id: UserId, feature: FeatureKey, level: UrgencyLevel) -> bool {
        let mut last_shown = self.last_shown.lock().await;
        if level == UrgencyLevel::Normal {
            last_shown.remove(&(user_id, feature));
            return false;
        }

        let previous = last_shown.insert((user_id, feature), level);
        level == UrgencyLevel::Critical || previous != Some(level)
    }

    pub async fn last_shown(&self, user_id: UserId, feature: FeatureKey) -> Option<UrgencyLevel> {
        self.last_shown.lock().await.get(&(user_id, feature)).copied()
    }

    /// Number of (user, feature) pairs currently holding an elevated level
    pub async fn tracked(&self) -> usize {
        self.last_shown.lock().await.len()
    }

    /// Forget a user's prompt history (e.g. after a tier change)
    pub async fn reset(&self, user_id: UserId) {
        self.last_shown.lock().await.retain(|(user, _), _| *user != user_id);
    }
}

impl Default for UpgradePromptScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_repeated_level_is_suppressed() {
        let scheduler = UpgradePromptScheduler::new();
        let user = UserId::new();

        assert!(scheduler.should_prompt(user, FeatureKey::CreateMatch, UrgencyLevel::High).await);
        assert!(!scheduler.should_prompt(user, FeatureKey::CreateMatch, UrgencyLevel::High).await);
        assert_eq!(
            scheduler.last_shown(user, FeatureKey::CreateMatch).await,
            Some(UrgencyLevel::High)
        );
    }

    #[tokio::test]
    async fn test_critical_always_prompts() {
        let scheduler = UpgradePromptScheduler::new();
        let user = UserId::new();

        for _ in 0..3 {
            assert!(scheduler.should_prompt(user, FeatureKey::SendMessage, UrgencyLevel::Critical).await);
        }
    }

    #[tokio::test]
    async fn test_normal_never_prompts_but_rearms() {
        let scheduler = UpgradePromptScheduler::new();
        let user = UserId::new();

        assert!(!scheduler.should_prompt(user, FeatureKey::CreateMatch, UrgencyLevel::Normal).await);
        assert!(scheduler.should_prompt(user, FeatureKey::CreateMatch, UrgencyLevel::Approaching).await);
        assert!(!scheduler.should_prompt(user, FeatureKey::CreateMatch, UrgencyLevel::Normal).await);
        assert_eq!(scheduler.last_shown(user, FeatureKey::CreateMatch).await, None);
        assert!(scheduler.should_prompt(user, FeatureKey::CreateMatch, UrgencyLevel::Approaching).await);
    }

    #[tokio::test]
    async fn test_normal_levels_are_not_retained() {
        let scheduler = UpgradePromptScheduler::new();

        for _ in 0..100 {
            scheduler
                .should_prompt(UserId::new(), FeatureKey::SendMessage, UrgencyLevel::Normal)
                .await;
        }
        assert_eq!(scheduler.tracked().await, 0);

        let user = UserId::new();
        scheduler.should_prompt(user, FeatureKey::SendMessage, UrgencyLevel::High).await;
        assert_eq!(scheduler.tracked().await, 1);
    }

    #[tokio::test]
    async fn test_state_is_per_user_and_feature() {
        let scheduler = UpgradePromptScheduler::new();
        let user_1 = UserId::new();
        let user_2 = UserId::new();

        assert!(scheduler.should_prompt(user_1, FeatureKey::CreateMatch, UrgencyLevel::High).await);
        assert!(scheduler.should_prompt(user_2, FeatureKey::CreateMatch, UrgencyLevel::High).await);
        assert!(scheduler.should_prompt(user_1, FeatureKey::SendMessage, UrgencyLevel::High).await);
    }

    #[tokio::test]
    async fn test_reset_forgets_user() {
        let scheduler = UpgradePromptScheduler::new();
        let user = UserId::new();
        let other = UserId::new();

        scheduler.should_prompt(user, FeatureKey::CreateMatch, UrgencyLevel::High).await;
        scheduler.should_prompt(other, FeatureKey::CreateMatch, UrgencyLevel::High).await;
        scheduler.reset(user).await;

        assert_eq!(scheduler.last_shown(user, FeatureKey::CreateMatch).await, None);
        assert!(scheduler.should_prompt(user, FeatureKey::CreateMatch, UrgencyLevel::High).await);
        assert!(!scheduler.should_prompt(other, FeatureKey::CreateMatch, UrgencyLevel::High).await);
    }
}
