//! Sending lockout: a soft degrade after a sustained run of rejected
//! registrations.
//!
//! Outbound sending is blocked once the failure count reaches
//! `max_failure_count` *and* the streak has lasted `max_failure_duration`.
//! A single successful registration clears both counters.

use serde::Serialize;

use crate::error::PreKeyError;
use crate::policy::{self, RotationPolicy};
use crate::store::LockoutStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockoutState {
    pub failure_count: u32,
    pub first_failure_at: Option<u64>,
}

impl LockoutState {
    pub fn load<S: LockoutStore + ?Sized>(store: &S) -> Result<Self, PreKeyError> {
        Ok(Self {
            failure_count: store.failure_count()?,
            first_failure_at: store.first_failure_at()?,
        })
    }

    pub fn is_blocked(&self, now_ms: u64, policy: &RotationPolicy) -> bool {
        if self.failure_count < policy.max_failure_count {
            return false;
        }
        // A count without a streak start is a half-written failure; the next
        // recorded failure repairs it.
        let Some(first) = self.first_failure_at else {
            return false;
        };
        now_ms.saturating_sub(first) >= policy::as_millis(policy.max_failure_duration)
    }
}

/// Record a failure that counts toward the lockout.
pub fn record_failure<S: LockoutStore + ?Sized>(
    store: &S,
    now_ms: u64,
) -> Result<LockoutState, PreKeyError> {
    let failure_count = store.increment_failure_count()?;
    let first_failure_at = match store.first_failure_at()? {
        Some(first) => first,
        None => {
            store.set_first_failure_at(now_ms)?;
            now_ms
        }
    };
    Ok(LockoutState {
        failure_count,
        first_failure_at: Some(first_failure_at),
    })
}

pub fn clear<S: LockoutStore + ?Sized>(store: &S) -> Result<(), PreKeyError> {
    store.clear_failure_count()?;
    store.clear_first_failure_at()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::memory_store::MemoryKeyStore;

    const DAY_MS: u64 = 24 * 60 * 60 * 1000;

    fn state(failure_count: u32, first_failure_at: Option<u64>) -> LockoutState {
        LockoutState {
            failure_count,
            first_failure_at,
        }
    }

    #[test]
    fn below_count_threshold_never_blocks() {
        let policy = RotationPolicy::default();
        for count in 0..5 {
            assert!(!state(count, Some(0)).is_blocked(100 * DAY_MS, &policy));
        }
    }

    #[test]
    fn count_and_duration_are_both_required() {
        let policy = RotationPolicy::default();
        let start = 1_000 * DAY_MS;
        let s = state(5, Some(start));
        assert!(!s.is_blocked(start + 10 * DAY_MS - 1, &policy));
        assert!(s.is_blocked(start + 10 * DAY_MS, &policy));
        assert!(state(9, Some(start)).is_blocked(start + 11 * DAY_MS, &policy));
    }

    #[test]
    fn missing_streak_start_does_not_block() {
        assert!(!state(7, None).is_blocked(u64::MAX, &RotationPolicy::default()));
    }

    #[test]
    fn custom_policy_thresholds_apply() {
        let policy = RotationPolicy {
            max_failure_count: 2,
            max_failure_duration: Duration::from_secs(1),
            ..RotationPolicy::default()
        };
        assert!(state(2, Some(0)).is_blocked(1_000, &policy));
    }

    #[test]
    fn first_failure_starts_the_streak_once() {
        let store = MemoryKeyStore::new();
        let first = record_failure(&store, 500).unwrap();
        assert_eq!(first, state(1, Some(500)));

        let second = record_failure(&store, 900).unwrap();
        assert_eq!(second, state(2, Some(500)));
        assert_eq!(LockoutState::load(&store).unwrap(), second);
    }

    #[test]
    fn fifth_failure_inside_window_stays_unblocked() {
        let policy = RotationPolicy::default();
        let store = MemoryKeyStore::new();
        for _ in 0..4 {
            record_failure(&store, 0).unwrap();
        }
        let fifth = record_failure(&store, 3 * DAY_MS).unwrap();
        assert_eq!(fifth.failure_count, 5);
        assert!(!fifth.is_blocked(3 * DAY_MS, &policy));
        assert!(fifth.is_blocked(10 * DAY_MS, &policy));
    }

    #[test]
    fn clear_resets_both_counters() {
        let store = MemoryKeyStore::new();
        record_failure(&store, 1).unwrap();
        clear(&store).unwrap();
        assert_eq!(LockoutState::load(&store).unwrap(), LockoutState::default());
    }
}
