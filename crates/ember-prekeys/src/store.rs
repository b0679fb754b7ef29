use ember_crypto::{IdentityKeyPair, OneTimePreKeyRecord, SignedPreKeyRecord};

use crate::error::PreKeyError;

/// Storage for our own identity key pair.
pub trait IdentityKeyStore: Send + Sync {
    fn load_identity_key_pair(&self) -> Result<Option<IdentityKeyPair>, PreKeyError>;

    fn store_identity_key_pair(&self, identity: &IdentityKeyPair) -> Result<(), PreKeyError>;
}

/// Storage for one-time prekeys.
///
/// The rotation engine only ever adds records; the session layer consumes
/// them through [`PreKeyStore::remove_one_time_prekey`].
pub trait PreKeyStore: Send + Sync {
    fn store_one_time_prekeys(&self, records: &[OneTimePreKeyRecord]) -> Result<(), PreKeyError>;

    fn load_one_time_prekey(&self, id: u32) -> Result<Option<OneTimePreKeyRecord>, PreKeyError>;

    fn remove_one_time_prekey(&self, id: u32) -> Result<(), PreKeyError>;

    fn count_one_time_prekeys(&self) -> Result<usize, PreKeyError>;

    /// First id of the next batch, or `None` before the first batch.
    fn next_prekey_id(&self) -> Result<Option<u32>, PreKeyError>;

    fn set_next_prekey_id(&self, id: u32) -> Result<(), PreKeyError>;
}

/// Storage for signed prekeys and the "current" designation.
pub trait SignedPreKeyStore: Send + Sync {
    fn load_signed_prekey(&self, id: u32) -> Result<Option<SignedPreKeyRecord>, PreKeyError>;

    fn load_all_signed_prekeys(&self) -> Result<Vec<SignedPreKeyRecord>, PreKeyError>;

    /// Insert or replace the record under its own id.
    fn store_signed_prekey(&self, record: &SignedPreKeyRecord) -> Result<(), PreKeyError>;

    fn remove_signed_prekey(&self, id: u32) -> Result<(), PreKeyError>;

    fn current_signed_prekey_id(&self) -> Result<Option<u32>, PreKeyError>;

    fn set_current_signed_prekey_id(&self, id: u32) -> Result<(), PreKeyError>;

    fn next_signed_prekey_id(&self) -> Result<Option<u32>, PreKeyError>;

    fn set_next_signed_prekey_id(&self, id: u32) -> Result<(), PreKeyError>;
}

/// Persistent counters behind the sending lockout.
pub trait LockoutStore: Send + Sync {
    fn failure_count(&self) -> Result<u32, PreKeyError>;

    /// Atomically add one to the failure count and return the new value.
    fn increment_failure_count(&self) -> Result<u32, PreKeyError>;

    fn clear_failure_count(&self) -> Result<(), PreKeyError>;

    fn first_failure_at(&self) -> Result<Option<u64>, PreKeyError>;

    fn set_first_failure_at(&self, at_ms: u64) -> Result<(), PreKeyError>;

    fn clear_first_failure_at(&self) -> Result<(), PreKeyError>;
}

/// Everything the rotation engine persists.
pub trait KeyStore: IdentityKeyStore + PreKeyStore + SignedPreKeyStore + LockoutStore {}

impl<T> KeyStore for T where T: IdentityKeyStore + PreKeyStore + SignedPreKeyStore + LockoutStore {}
