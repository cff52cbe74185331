//! PostgreSQL counter backend
//!
//! One row per (user_id, feature) in `feature_usage`. Rollover and the bounded
//! increment run as a single `INSERT ... ON CONFLICT DO UPDATE ... WHERE`
//! statement; Postgres holds the row lock for the duration, so concurrent
//! attempts for the same (user, feature) serialize on the row and the ceiling
//! check always sees the latest committed count.

use async_trait::async_trait;
use lusotown_shared::{FeatureKey, UserId};
use sqlx::PgPool;

use crate::clock::PeriodKey;
use crate::error::{StoreError, StoreResult};
use crate::store::{CounterBackend, IncrementOutcome, UsageCounter};

/// Counter backend on a Postgres pool
#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn to_db_amount(value: u64, what: &str) -> StoreResult<i64> {
    i64::try_from(value)
        .map_err(|_| StoreError::Database(format!("{} {} exceeds BIGINT range", what, value)))
}

fn counter_from_row(user_id: UserId, feature: FeatureKey, row: (i64, String)) -> UsageCounter {
    UsageCounter {
        user_id,
        feature,
        count: row.0.max(0) as u64,
        period_key: PeriodKey::new(row.1),
    }
}

#[async_trait]
impl CounterBackend for PgBackend {
    async fn read(
        &self,
        user_id: UserId,
        feature: FeatureKey,
        current: &PeriodKey,
    ) -> StoreResult<UsageCounter> {
        // Create at zero or roll a stale period forward; returns nothing when
        // the row already belongs to the current (or a newer) period
        let rolled: Option<(i64, String)> = sqlx::query_as(
            r#"
            INSERT INTO feature_usage (user_id, feature, count, period_key)
            VALUES ($1, $2, 0, $3)
            ON CONFLICT (user_id, feature) DO UPDATE SET
                count = 0,
                period_key = EXCLUDED.period_key,
                updated_at = NOW()
            WHERE feature_usage.period_key < EXCLUDED.period_key
            RETURNING count, period_key
            "#,
        )
        .bind(user_id)
        .bind(feature)
        .bind(current.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = rolled {
            return Ok(counter_from_row(user_id, feature, row));
        }

        let row: (i64, String) = sqlx::query_as(
            "SELECT count, period_key FROM feature_usage WHERE user_id = $1 AND feature = $2",
        )
        .bind(user_id)
        .bind(feature)
        .fetch_one(&self.pool)
        .await?;

        Ok(counter_from_row(user_id, feature, row))
    }

    async fn add(
        &self,
        user_id: UserId,
        feature: FeatureKey,
        current: &PeriodKey,
        amount: u64,
        ceiling: Option<u64>,
    ) -> StoreResult<IncrementOutcome> {
        let amount_db = to_db_amount(amount, "amount")?;
        let ceiling_db = ceiling.map(|c| to_db_amount(c, "ceiling")).transpose()?;

        let applied: Option<(i64, String)> = sqlx::query_as(
            r#"
            INSERT INTO feature_usage (user_id, feature, count, period_key)
            SELECT $1, $2, $4, $3
            WHERE $5::BIGINT IS NULL OR $4 <= $5::BIGINT
            ON CONFLICT (user_id, feature) DO UPDATE SET
                count = CASE
                    WHEN feature_usage.period_key < EXCLUDED.period_key THEN EXCLUDED.count
                    ELSE feature_usage.count + EXCLUDED.count
                END,
                period_key = GREATEST(feature_usage.period_key, EXCLUDED.period_key),
                updated_at = NOW()
            WHERE $5::BIGINT IS NULL
               OR (CASE
                       WHEN feature_usage.period_key < EXCLUDED.period_key THEN 0
                       ELSE feature_usage.count
                   END) + EXCLUDED.count <= $5::BIGINT
            RETURNING count, period_key
            "#,
        )
        .bind(user_id)
        .bind(feature)
        .bind(current.as_str())
        .bind(amount_db)
        .bind(ceiling_db)
        .fetch_optional(&self.pool)
        .await?;

        match applied {
            Some(row) => Ok(IncrementOutcome::Applied(counter_from_row(user_id, feature, row))),
            None => {
                let counter = self.read(user_id, feature, current).await?;
                Ok(IncrementOutcome::Rejected(counter))
            }
        }
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
