//! Tunables for the rotation engine.
//!
//! Durations are written to and read from JSON as whole seconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PreKeyError;

const DAY: u64 = 24 * 60 * 60;

/// Minimum time between two pre-key checks.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

/// Replenish once the service reports fewer one-time pre-keys than this.
pub const MIN_REMOTE_PREKEYS: u32 = 35;

/// One-time pre-keys generated per replenishment.
pub const PREKEY_BATCH_SIZE: u32 = 100;

/// Rotate the current signed pre-key once it is older than this.
pub const SIGNED_PREKEY_ROTATION_AGE: Duration = Duration::from_secs(2 * DAY);

/// Failure count at which the sending lockout may engage.
pub const MAX_FAILURE_COUNT: u32 = 5;

/// Failure streak duration at which the sending lockout may engage.
pub const MAX_FAILURE_DURATION: Duration = Duration::from_secs(10 * DAY);

/// Signed pre-keys younger than this are never pruned.
pub const SIGNED_PREKEY_DELETION_AGE: Duration = Duration::from_secs(7 * DAY);

/// Floor of non-current signed pre-keys kept by pruning.
pub const MIN_RETAINED_SIGNED_PREKEYS: usize = 3;

/// Floor of non-current, service-accepted signed pre-keys kept by pruning.
pub const MIN_RETAINED_ACCEPTED_SIGNED_PREKEYS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationPolicy {
    #[serde(with = "duration_secs")]
    pub check_interval: Duration,
    pub min_remote_prekeys: u32,
    pub prekey_batch_size: u32,
    #[serde(with = "duration_secs")]
    pub signed_prekey_rotation_age: Duration,
    pub max_failure_count: u32,
    #[serde(with = "duration_secs")]
    pub max_failure_duration: Duration,
    #[serde(with = "duration_secs")]
    pub signed_prekey_deletion_age: Duration,
    pub min_retained_signed_prekeys: usize,
    pub min_retained_accepted_signed_prekeys: usize,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            check_interval: CHECK_INTERVAL,
            min_remote_prekeys: MIN_REMOTE_PREKEYS,
            prekey_batch_size: PREKEY_BATCH_SIZE,
            signed_prekey_rotation_age: SIGNED_PREKEY_ROTATION_AGE,
            max_failure_count: MAX_FAILURE_COUNT,
            max_failure_duration: MAX_FAILURE_DURATION,
            signed_prekey_deletion_age: SIGNED_PREKEY_DELETION_AGE,
            min_retained_signed_prekeys: MIN_RETAINED_SIGNED_PREKEYS,
            min_retained_accepted_signed_prekeys: MIN_RETAINED_ACCEPTED_SIGNED_PREKEYS,
        }
    }
}

impl RotationPolicy {
    /// Load a policy from a JSON file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, PreKeyError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PreKeyError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, PreKeyError> {
        let policy: Self =
            serde_json::from_str(raw).map_err(|e| PreKeyError::Config(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    fn validate(&self) -> Result<(), PreKeyError> {
        if self.prekey_batch_size == 0 {
            return Err(PreKeyError::Config("prekey_batch_size must be positive".into()));
        }
        if self.max_failure_count == 0 {
            return Err(PreKeyError::Config("max_failure_count must be positive".into()));
        }
        Ok(())
    }
}

/// Millisecond view of a policy duration, saturating at `u64::MAX`.
pub(crate) fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let policy = RotationPolicy::default();
        assert_eq!(policy.check_interval, Duration::from_secs(43_200));
        assert_eq!(policy.min_remote_prekeys, 35);
        assert_eq!(policy.prekey_batch_size, 100);
        assert_eq!(policy.max_failure_count, 5);
        assert_eq!(policy.max_failure_duration, Duration::from_secs(864_000));
        assert_eq!(policy.signed_prekey_deletion_age, Duration::from_secs(604_800));
        assert_eq!(policy.min_retained_signed_prekeys, 3);
        assert_eq!(policy.min_retained_accepted_signed_prekeys, 3);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let policy =
            RotationPolicy::from_json(r#"{"check_interval": 60, "min_remote_prekeys": 10}"#)
                .unwrap();
        assert_eq!(policy.check_interval, Duration::from_secs(60));
        assert_eq!(policy.min_remote_prekeys, 10);
        assert_eq!(policy.prekey_batch_size, PREKEY_BATCH_SIZE);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        assert!(matches!(
            RotationPolicy::from_json(r#"{"prekey_batch_size": 0}"#),
            Err(PreKeyError::Config(_))
        ));
    }

    #[test]
    fn json_roundtrip_uses_seconds() {
        let json = serde_json::to_value(RotationPolicy::default()).unwrap();
        assert_eq!(json["check_interval"], 43_200);
        assert_eq!(json["signed_prekey_rotation_age"], 172_800);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(&path, r#"{"max_failure_count": 7}"#).unwrap();
        assert_eq!(RotationPolicy::load(&path).unwrap().max_failure_count, 7);
        assert!(RotationPolicy::load(&dir.path().join("missing.json")).is_err());
    }
}
