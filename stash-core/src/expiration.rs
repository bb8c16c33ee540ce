//! Expiration policies for cache entries.
//!
//! A policy is attached to every entry at save time. Staleness is always
//! derived from the policy, the entry's creation time and the current
//! time; it is never stored.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::SECONDS_PER_DAY;

/// When a cache entry stops being served.
///
/// On disk the policy is written as `{"type": "...", "value": ...}` with the
/// tags `never`, `seconds`, `days`, `date` and `expired`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ExpirationPolicy {
    /// Never goes stale, regardless of age.
    Never,

    /// Stale once more than this many seconds have passed since creation.
    Seconds(f64),

    /// Stale once more than this many whole days have passed since creation.
    Days(i64),

    /// Stale once the clock passes this instant.
    #[serde(rename = "date", with = "crate::timestamp")]
    AbsoluteDate(DateTime<Utc>),

    /// Always stale. Saving with this policy is rejected.
    #[serde(rename = "expired")]
    AlreadyExpired,
}

impl ExpirationPolicy {
    /// Policy that expires after the given duration.
    pub fn from_duration(duration: Duration) -> Self {
        Self::Seconds(duration.as_secs_f64())
    }

    /// Returns true if this is the `Never` policy.
    pub fn is_never(&self) -> bool {
        matches!(self, Self::Never)
    }

    /// Whether an entry created at `created_at` is stale at `now`.
    pub fn is_stale(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Self::Never => false,
            Self::Seconds(secs) => elapsed_secs(created_at, now) > *secs,
            Self::Days(days) => {
                let lifetime = days.saturating_mul(SECONDS_PER_DAY);
                elapsed_secs(created_at, now) > lifetime as f64
            }
            Self::AbsoluteDate(deadline) => now > *deadline,
            Self::AlreadyExpired => true,
        }
    }

    /// Whether a save made at `now` with this policy would be stale on arrival.
    ///
    /// Differs from `is_stale(now, now)` for zero-length lifetimes:
    /// `Seconds(0.0)` and `Days(0)` are rejected here.
    pub fn is_already_expired(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Never => false,
            Self::Seconds(secs) => !(secs.is_finite() && *secs > 0.0),
            Self::Days(days) => *days <= 0,
            Self::AbsoluteDate(deadline) => now > *deadline,
            Self::AlreadyExpired => true,
        }
    }

    /// The instant an entry created at `created_at` goes stale.
    ///
    /// Returns `None` for `Never`, and for lifetimes too large to represent.
    pub fn expires_at(&self, created_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Never => None,
            Self::Seconds(secs) => {
                let micros = secs * 1_000_000.0;
                if !micros.is_finite() || micros.abs() >= i64::MAX as f64 {
                    return None;
                }
                created_at.checked_add_signed(TimeDelta::microseconds(micros as i64))
            }
            Self::Days(days) => {
                TimeDelta::try_days(*days).and_then(|lifetime| created_at.checked_add_signed(lifetime))
            }
            Self::AbsoluteDate(deadline) => Some(*deadline),
            Self::AlreadyExpired => Some(created_at),
        }
    }
}

/// Fractional seconds between two instants (negative if `now` is earlier).
fn elapsed_secs(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let delta = now.signed_duration_since(created_at);
    match delta.num_microseconds() {
        Some(micros) => micros as f64 / 1_000_000.0,
        None => delta.num_seconds() as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn created() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 27, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_never_is_never_stale() {
        let policy = ExpirationPolicy::Never;
        let far_future = created() + TimeDelta::days(365 * 100);
        assert!(!policy.is_stale(created(), far_future));
        assert!(!policy.is_already_expired(far_future));
        assert!(policy.is_never());
    }

    #[test]
    fn test_already_expired_is_always_stale() {
        let policy = ExpirationPolicy::AlreadyExpired;
        assert!(policy.is_stale(created(), created()));
        assert!(policy.is_already_expired(created()));
    }

    #[test]
    fn test_seconds_boundary() {
        let policy = ExpirationPolicy::Seconds(10.0);
        assert!(!policy.is_stale(created(), created() + TimeDelta::seconds(10)));
        assert!(policy.is_stale(created(), created() + TimeDelta::milliseconds(10_001)));
    }

    #[test]
    fn test_days_boundary() {
        let policy = ExpirationPolicy::Days(7);
        assert!(!policy.is_stale(created(), created() + TimeDelta::days(7)));
        assert!(policy.is_stale(created(), created() + TimeDelta::days(7) + TimeDelta::seconds(1)));
    }

    #[test]
    fn test_absolute_date() {
        let deadline = created() + TimeDelta::hours(1);
        let policy = ExpirationPolicy::AbsoluteDate(deadline);
        assert!(!policy.is_stale(created(), deadline));
        assert!(policy.is_stale(created(), deadline + TimeDelta::seconds(1)));
        assert!(!policy.is_already_expired(created()));
        assert!(policy.is_already_expired(deadline + TimeDelta::seconds(1)));
    }

    #[test]
    fn test_zero_length_lifetimes_rejected_on_save() {
        let now = created();
        assert!(ExpirationPolicy::Seconds(0.0).is_already_expired(now));
        assert!(ExpirationPolicy::Seconds(-5.0).is_already_expired(now));
        assert!(ExpirationPolicy::Seconds(f64::NAN).is_already_expired(now));
        assert!(ExpirationPolicy::Days(0).is_already_expired(now));
        assert!(!ExpirationPolicy::Seconds(0.5).is_already_expired(now));
        assert!(!ExpirationPolicy::Days(1).is_already_expired(now));
    }

    #[test]
    fn test_expires_at() {
        assert_eq!(ExpirationPolicy::Never.expires_at(created()), None);
        assert_eq!(
            ExpirationPolicy::Seconds(90.0).expires_at(created()),
            Some(created() + TimeDelta::seconds(90))
        );
        assert_eq!(
            ExpirationPolicy::Days(2).expires_at(created()),
            Some(created() + TimeDelta::days(2))
        );
        assert_eq!(ExpirationPolicy::Days(i64::MAX).expires_at(created()), None);
        assert_eq!(ExpirationPolicy::Seconds(f64::INFINITY).expires_at(created()), None);
    }

    #[test]
    fn test_from_duration() {
        let policy = ExpirationPolicy::from_duration(Duration::from_millis(1500));
        assert_eq!(policy, ExpirationPolicy::Seconds(1.5));
    }

    #[test]
    fn test_wire_representation() {
        let json = serde_json::to_value(ExpirationPolicy::Seconds(300.0)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "seconds", "value": 300.0}));

        let json = serde_json::to_value(ExpirationPolicy::Days(7)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "days", "value": 7}));

        let json = serde_json::to_value(ExpirationPolicy::Never).unwrap();
        assert_eq!(json, serde_json::json!({"type": "never"}));

        let json = serde_json::to_value(ExpirationPolicy::AlreadyExpired).unwrap();
        assert_eq!(json, serde_json::json!({"type": "expired"}));

        let json = serde_json::to_value(ExpirationPolicy::AbsoluteDate(created())).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "date", "value": "2024-11-27T00:00:00.000000Z"})
        );
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let result: Result<ExpirationPolicy, _> =
            serde_json::from_str(r#"{"type": "fortnights", "value": 2}"#);
        assert!(result.is_err());
    }
}
