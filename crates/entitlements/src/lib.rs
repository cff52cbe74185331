//! LusoTown Entitlements
//!
//! Decides whether a user may use a rate-limited feature right now, based on
//! their subscription tier and consumption in the current period, and when to
//! nudge them towards an upgrade.
//!
//! Module layout:
//! - `policy`: static tier × feature limit table
//! - `clock`: period keys and reset instants in the reference timezone
//! - `store`: lazily rolled-over usage counters over a pluggable backend
//! - `memory` / `postgres`: counter backends
//! - `evaluator`: access decisions, failing closed on store errors
//! - `urgency` / `prompt`: upgrade nudges derived from decisions
//! - `engine`: explicitly constructed facade wiring all of the above

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod memory;
pub mod policy;
pub mod postgres;
pub mod prompt;
pub mod store;
pub mod urgency;

pub use clock::{time_until_reset, ManualTime, PeriodKey, TimeSource, UsageClock};
pub use config::{BackendConfig, EngineConfig, LimitOverride};
pub use engine::{EntitlementEngine, FeatureUsage, GateOutcome};
pub use error::{ConfigError, EntitlementError, EntitlementResult, StoreError, StoreResult};
pub use evaluator::{AccessDecision, AccessEvaluator, DenyReason, Remaining};
pub use memory::MemoryBackend;
pub use policy::{default_limit, TierPolicy};
pub use postgres::PgBackend;
pub use prompt::{UpgradePrompt, UpgradePromptScheduler};
pub use store::{CounterBackend, EntitlementStore, IncrementOutcome, UsageCounter};
pub use urgency::{classify, classify_decision, UrgencyLevel};

pub use lusotown_shared::{FeatureKey, Limit, PeriodType, Tier, UserId};
