//! Common types used across LusoTown

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// User ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for UserId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| format!("Invalid user id {}: {}", s, e))
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Membership tier, supplied by the subscription collaborator.
///
/// Variants are declared in ascending order so the derived `Ord` matches
/// [`Tier::rank`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Community,
    Ambassador,
}

impl Default for Tier {
    fn default() -> Self {
        Self::Free
    }
}

impl Tier {
    /// All tiers, lowest first
    pub const ALL: [Tier; 3] = [Tier::Free, Tier::Community, Tier::Ambassador];

    /// Ordinal rank (higher = more privileges)
    /// Free: 0, Community: 1, Ambassador: 2
    pub fn rank(&self) -> u8 {
        match self {
            Self::Free => 0,
            Self::Community => 1,
            Self::Ambassador => 2,
        }
    }

    /// "At least tier X" check
    pub fn at_least(&self, other: Tier) -> bool {
        self.rank() >= other.rank()
    }

    /// Tiers strictly above this one, lowest first
    pub fn higher_tiers(self) -> impl Iterator<Item = Tier> {
        Self::ALL.into_iter().filter(move |t| t.rank() > self.rank())
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Community => write!(f, "community"),
            Self::Ambassador => write!(f, "ambassador"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "community" => Ok(Self::Community),
            "ambassador" => Ok(Self::Ambassador),
            _ => Err(format!("Invalid membership tier: {}", s)),
        }
    }
}

/// Window over which a feature's usage accumulates before resetting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Daily,
    Monthly,
    /// Never resets
    None,
}

impl std::fmt::Display for PeriodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily => write!(f, "daily"),
            Self::Monthly => write!(f, "monthly"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Rate-limited capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FeatureKey {
    CreateMatch,
    SendMessage,
    AccessPremiumEvent,
    /// Metered in minutes
    AccessLivestream,
}

impl FeatureKey {
    pub const ALL: [FeatureKey; 4] = [
        FeatureKey::CreateMatch,
        FeatureKey::SendMessage,
        FeatureKey::AccessPremiumEvent,
        FeatureKey::AccessLivestream,
    ];

    /// Period over which usage of this feature is counted
    pub fn period_type(&self) -> PeriodType {
        match self {
            Self::CreateMatch => PeriodType::Daily,
            Self::SendMessage => PeriodType::Monthly,
            Self::AccessPremiumEvent => PeriodType::None,
            Self::AccessLivestream => PeriodType::Monthly,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateMatch => "create_match",
            Self::SendMessage => "send_message",
            Self::AccessPremiumEvent => "access_premium_event",
            Self::AccessLivestream => "access_livestream",
        }
    }
}

impl std::fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FeatureKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "create_match" => Ok(Self::CreateMatch),
            "send_message" => Ok(Self::SendMessage),
            "access_premium_event" => Ok(Self::AccessPremiumEvent),
            "access_livestream" => Ok(Self::AccessLivestream),
            _ => Err(format!("Invalid feature key: {}", s)),
        }
    }
}

/// Per-period allowance for a (tier, feature) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Limit {
    Limited(u64),
    Unlimited,
}

impl Limit {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Self::Unlimited)
    }

    /// Zero allowance means the tier does not include the feature at all
    pub fn is_zero(&self) -> bool {
        matches!(self, Self::Limited(0))
    }

    /// Whether `self` grants strictly more than `other`
    pub fn more_generous_than(&self, other: &Limit) -> bool {
        match (self, other) {
            (Self::Unlimited, Self::Unlimited) => false,
            (Self::Unlimited, Self::Limited(_)) => true,
            (Self::Limited(_), Self::Unlimited) => false,
            (Self::Limited(a), Self::Limited(b)) => a > b,
        }
    }
}

impl std::fmt::Display for Limit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Limited(n) => write!(f, "{}", n),
            Self::Unlimited => write!(f, "unlimited"),
        }
    }
}

impl std::str::FromStr for Limit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("unlimited") || trimmed == "-1" {
            return Ok(Self::Unlimited);
        }
        trimmed
            .parse::<u64>()
            .map(Self::Limited)
            .map_err(|_| format!("Invalid limit (expected non-negative integer or 'unlimited'): {}", s))
    }
}
