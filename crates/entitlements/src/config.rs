//! Engine configuration
//!
//! Loaded from environment variables at service start:
//! - `ENTITLEMENTS_TIMEZONE`: reference timezone for period boundaries (default: Europe/London)
//! - `ENTITLEMENTS_STORE_TIMEOUT_MS`: per-call counter store timeout (default: 2000)
//! - `ENTITLEMENTS_BACKEND`: `memory` (default) or `postgres`
//! - `DATABASE_URL`: required for the `postgres` backend
//! - `DATABASE_MAX_CONNECTIONS`: pool size for the `postgres` backend (default: 5)
//! - `ENTITLEMENTS_LIMIT_<TIER>_<FEATURE>`: limit override, e.g.
//!   `ENTITLEMENTS_LIMIT_FREE_CREATE_MATCH=5` or `ENTITLEMENTS_LIMIT_COMMUNITY_ACCESS_LIVESTREAM=unlimited`

use std::env;
use std::time::Duration;

use chrono_tz::Tz;
use lusotown_shared::{FeatureKey, Limit, Tier};

use crate::error::ConfigError;

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::London;
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Which counter backend the engine runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    /// Process-local counters, lost on restart
    Memory,
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

/// Operator override of a single (tier, feature) limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitOverride {
    pub tier: Tier,
    pub feature: FeatureKey,
    pub limit: Limit,
}

/// Entitlement engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub timezone: Tz,
    pub store_timeout: Duration,
    pub backend: BackendConfig,
    pub limit_overrides: Vec<LimitOverride>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE,
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            backend: BackendConfig::Memory,
            limit_overrides: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let timezone = match lookup("ENTITLEMENTS_TIMEZONE") {
            Some(raw) => raw.trim().parse::<Tz>().map_err(|_| ConfigError::Invalid {
                name: "ENTITLEMENTS_TIMEZONE".to_string(),
                reason: format!("unknown timezone '{}'", raw),
            })?,
            None => DEFAULT_TIMEZONE,
        };

        let store_timeout_ms = match lookup("ENTITLEMENTS_STORE_TIMEOUT_MS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => ms,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "ENTITLEMENTS_STORE_TIMEOUT_MS".to_string(),
                        reason: format!("expected a positive integer, got '{}'", raw),
                    })
                }
            },
            None => DEFAULT_STORE_TIMEOUT_MS,
        };

        let backend = match lookup("ENTITLEMENTS_BACKEND")
            .unwrap_or_else(|| "memory".to_string())
            .trim()
            .to_lowercase()
            .as_str()
        {
            "memory" => BackendConfig::Memory,
            "postgres" => BackendConfig::Postgres {
                database_url: lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
                max_connections: match lookup("DATABASE_MAX_CONNECTIONS") {
                    Some(raw) => match raw.trim().parse::<u32>() {
                        Ok(n) if n > 0 => n,
                        _ => {
                            return Err(ConfigError::Invalid {
                                name: "DATABASE_MAX_CONNECTIONS".to_string(),
                                reason: format!("expected a positive integer, got '{}'", raw),
                            })
                        }
                    },
                    None => DEFAULT_MAX_CONNECTIONS,
                },
            },
            other => {
                return Err(ConfigError::Invalid {
                    name: "ENTITLEMENTS_BACKEND".to_string(),
                    reason: format!("expected 'memory' or 'postgres', got '{}'", other),
                })
            }
        };

        let mut limit_overrides = Vec::new();
        for tier in Tier::ALL {
            for feature in FeatureKey::ALL {
                let name = override_var_name(tier, feature);
                if let Some(raw) = lookup(&name) {
                    let limit = raw
                        .parse::<Limit>()
                        .map_err(|reason| ConfigError::Invalid { name, reason })?;
                    limit_overrides.push(LimitOverride {
                        tier,
                        feature,
                        limit,
                    });
                }
            }
        }

        Ok(Self {
            timezone,
            store_timeout: Duration::from_millis(store_timeout_ms),
            backend,
            limit_overrides,
        })
    }
}

/// Environment variable carrying the override for a (tier, feature) pair
pub fn override_var_name(tier: Tier, feature: FeatureKey) -> String {
    format!(
        "ENTITLEMENTS_LIMIT_{}_{}",
        tier.to_string().to_uppercase(),
        feature.as_str().to_uppercase()
    )
}
