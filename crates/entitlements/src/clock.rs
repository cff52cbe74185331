//! Usage clock
//!
//! Single trusted source for period keys and reset boundaries. Both the
//! counter store and "time until reset" displays go through this clock so
//! they can never disagree about where a period ends.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use lusotown_shared::PeriodType;
use serde::{Deserialize, Serialize};

/// Key used for features whose usage never resets
pub const LIFETIME_PERIOD_KEY: &str = "lifetime";

/// Opaque identifier of a usage period.
///
/// Daily keys are `YYYY-MM-DD`, monthly keys `YYYY-MM`. Keys of the same
/// period type sort in time order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeriodKey(String);

impl PeriodKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn lifetime() -> Self {
        Self(LIFETIME_PERIOD_KEY.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Manually driven time, for tests and replay
#[derive(Debug, Clone)]
pub struct ManualTime(Arc<AtomicI64>);

impl ManualTime {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(Arc::new(AtomicI64::new(at.timestamp_millis())))
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.0.store(at.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }

    pub fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.0.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

/// Where the clock reads wall time from
#[derive(Debug, Clone)]
pub enum TimeSource {
    System,
    Manual(ManualTime),
}

impl TimeSource {
    fn now(&self) -> DateTime<Utc> {
        match self {
            TimeSource::System => Utc::now(),
            TimeSource::Manual(manual) => manual.now(),
        }
    }
}

/// Computes period keys and reset instants in a fixed reference timezone
#[derive(Debug)]
pub struct UsageClock {
    tz: Tz,
    source: TimeSource,
    /// Latest instant handed out by `now()`, in unix millis
    high_water_ms: AtomicI64,
}

impl UsageClock {
    pub fn new(tz: Tz) -> Self {
        Self::with_source(tz, TimeSource::System)
    }

    pub fn with_source(tz: Tz, source: TimeSource) -> Self {
        Self {
            tz,
            source,
            high_water_ms: AtomicI64::new(i64::MIN),
        }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Current instant. Never earlier than an instant already returned, so a
    /// backward jump of the underlying clock cannot regress the period key.
    pub fn now(&self) -> DateTime<Utc> {
        let observed = self.source.now();
        let observed_ms = observed.timestamp_millis();
        let previous_ms = self.high_water_ms.fetch_max(observed_ms, Ordering::SeqCst);

        if observed_ms >= previous_ms {
            return observed;
        }

        tracing::warn!(
            observed = %observed,
            regression_ms = previous_ms - observed_ms,
            "Wall clock moved backwards; holding usage clock at last seen instant"
        );
        DateTime::from_timestamp_millis(previous_ms).unwrap_or(observed)
    }

    /// Key of the period containing `now`
    pub fn current_period_key(&self, period: PeriodType, now: DateTime<Utc>) -> PeriodKey {
        let local = now.with_timezone(&self.tz);
        match period {
            PeriodType::Daily => PeriodKey(local.format("%Y-%m-%d").to_string()),
            PeriodType::Monthly => PeriodKey(local.format("%Y-%m").to_string()),
            PeriodType::None => PeriodKey::lifetime(),
        }
    }

    /// First instant of the period after the one containing `now`.
    /// `None` for periods that never reset.
    pub fn next_reset_at(&self, period: PeriodType, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = now.with_timezone(&self.tz).date_naive();
        let boundary = match period {
            PeriodType::Daily => today.succ_opt()?,
            PeriodType::Monthly => {
                let (year, month) = if today.month() == 12 {
                    (today.year() + 1, 1)
                } else {
                    (today.year(), today.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1)?
            }
            PeriodType::None => return None,
        };
        self.local_midnight_utc(boundary)
    }

    /// Local midnight of `date` as a UTC instant. Midnight inside a DST gap
    /// resolves to the transition instant; an ambiguous midnight to the earlier one.
    fn local_midnight_utc(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        let naive = date.and_hms_opt(0, 0, 0)?;
        let zoned = match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => dt.with_timezone(&Utc),
            LocalResult::Ambiguous(a, b) => a.min(b).with_timezone(&Utc),
            LocalResult::None => {
                let before = self
                    .tz
                    .offset_from_utc_datetime(&(naive - Duration::days(1)))
                    .fix();
                Utc.from_utc_datetime(&(naive - Duration::seconds(before.local_minus_utc() as i64)))
            }
        };
        Some(zoned)
    }
}

/// Time left until `reset_at`, clamped at zero. Pure; callers recompute it
/// on demand instead of polling.
pub fn time_until_reset(reset_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<Duration> {
    reset_at.map(|at| (at - now).max(Duration::zero()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn london() -> UsageClock {
        UsageClock::new(chrono_tz::Europe::London)
    }

    #[test]
    fn test_daily_key_uses_reference_timezone() {
        let clock = london();
        // 23:30 UTC in July is 00:30 BST the next day
        let now = utc("2025-07-15T23:30:00Z");
        assert_eq!(clock.current_period_key(PeriodType::Daily, now).as_str(), "2025-07-16");
        assert_eq!(clock.current_period_key(PeriodType::Monthly, now).as_str(), "2025-07");
    }

    #[test]
    fn test_lifetime_key_is_constant() {
        let clock = london();
        let a = clock.current_period_key(PeriodType::None, utc("2020-01-01T00:00:00Z"));
        let b = clock.current_period_key(PeriodType::None, utc("2030-06-01T00:00:00Z"));
        assert_eq!(a, b);
        assert_eq!(clock.next_reset_at(PeriodType::None, utc("2025-01-01T00:00:00Z")), None);
    }

    #[test]
    fn test_next_daily_reset_in_summer_time() {
        let clock = london();
        let reset = clock.next_reset_at(PeriodType::Daily, utc("2025-07-15T12:00:00Z"));
        assert_eq!(reset, Some(utc("2025-07-15T23:00:00Z")));
    }

    #[test]
    fn test_next_daily_reset_in_winter_time() {
        let clock = london();
        let reset = clock.next_reset_at(PeriodType::Daily, utc("2025-01-10T08:00:00Z"));
        assert_eq!(reset, Some(utc("2025-01-11T00:00:00Z")));
    }

    #[test]
    fn test_next_monthly_reset_rolls_year() {
        let clock = london();
        let reset = clock.next_reset_at(PeriodType::Monthly, utc("2025-12-31T10:00:00Z"));
        assert_eq!(reset, Some(utc("2026-01-01T00:00:00Z")));

        let reset = clock.next_reset_at(PeriodType::Monthly, utc("2025-03-15T10:00:00Z"));
        // April 1st is already in BST
        assert_eq!(reset, Some(utc("2025-03-31T23:00:00Z")));
    }

    #[test]
    fn test_midnight_in_dst_gap_resolves_to_transition() {
        // Chile skips from 00:00 to 01:00 on 2024-09-08
        let clock = UsageClock::new(chrono_tz::America::Santiago);
        let reset = clock.next_reset_at(PeriodType::Daily, utc("2024-09-07T15:00:00Z"));
        assert_eq!(reset, Some(utc("2024-09-08T04:00:00Z")));
    }

    #[test]
    fn test_ambiguous_midnight_resolves_to_earlier_instant() {
        // Cuba falls back from 01:00 CDT to 00:00 CST on 2024-11-03, so local
        // midnight happens at both 04:00Z and 05:00Z
        let clock = UsageClock::new(chrono_tz::America::Havana);
        let reset = clock.next_reset_at(PeriodType::Daily, utc("2024-11-02T16:00:00Z"));
        assert_eq!(reset, Some(utc("2024-11-03T04:00:00Z")));

        let key = clock.current_period_key(PeriodType::Daily, utc("2024-11-03T04:00:00Z"));
        assert_eq!(key.as_str(), "2024-11-03");
    }

    #[test]
    fn test_reset_boundary_starts_new_period() {
        let clock = london();
        let now = utc("2025-02-10T15:00:00Z");
        let reset = clock.next_reset_at(PeriodType::Daily, now).unwrap();
        let before = clock.current_period_key(PeriodType::Daily, reset - Duration::milliseconds(1));
        let after = clock.current_period_key(PeriodType::Daily, reset);
        assert_eq!(before.as_str(), "2025-02-10");
        assert_eq!(after.as_str(), "2025-02-11");
        assert!(after > before);
    }

    #[test]
    fn test_now_is_monotonic() {
        let manual = ManualTime::new(utc("2025-05-01T10:00:00Z"));
        let clock = UsageClock::with_source(chrono_tz::Europe::London, TimeSource::Manual(manual.clone()));
        assert_eq!(clock.now(), utc("2025-05-01T10:00:00Z"));

        manual.set(utc("2025-04-30T10:00:00Z"));
        assert_eq!(clock.now(), utc("2025-05-01T10:00:00Z"));

        manual.advance(Duration::days(2));
        assert_eq!(clock.now(), utc("2025-05-02T10:00:00Z"));
    }

    #[test]
    fn test_time_until_reset() {
        let now = utc("2025-05-01T10:00:00Z");
        assert_eq!(
            time_until_reset(Some(utc("2025-05-01T12:30:00Z")), now),
            Some(Duration::minutes(150))
        );
        assert_eq!(
            time_until_reset(Some(utc("2025-05-01T09:00:00Z")), now),
            Some(Duration::zero())
        );
        assert_eq!(time_until_reset(None, now), None);
    }
}
