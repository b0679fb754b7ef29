//! In-memory implementation of the key store traits.
//!
//! Suitable for tests and for hosts that persist state elsewhere.
//!
//! **WARNING**: Data is lost on process exit. Use
//! [`SqliteKeyStore`](crate::sqlite_store::SqliteKeyStore) for anything that
//! must survive a restart.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use ember_crypto::{IdentityKeyPair, OneTimePreKeyRecord, SignedPreKeyRecord};

use crate::error::PreKeyError;
use crate::store::{IdentityKeyStore, LockoutStore, PreKeyStore, SignedPreKeyStore};

#[derive(Default)]
struct MemoryState {
    identity_secret: Option<[u8; 32]>,
    prekeys: BTreeMap<u32, OneTimePreKeyRecord>,
    next_prekey_id: Option<u32>,
    signed_prekeys: BTreeMap<u32, SignedPreKeyRecord>,
    current_signed_prekey_id: Option<u32>,
    next_signed_prekey_id: Option<u32>,
    failure_count: u32,
    first_failure_at: Option<u64>,
}

/// In-memory key store. All state sits behind one lock, so each call is
/// atomic with respect to the others.
#[derive(Default)]
pub struct MemoryKeyStore {
    state: Mutex<MemoryState>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityKeyStore for MemoryKeyStore {
    fn load_identity_key_pair(&self) -> Result<Option<IdentityKeyPair>, PreKeyError> {
        Ok(self
            .state
            .lock()
            .identity_secret
            .as_ref()
            .map(IdentityKeyPair::from_secret_bytes))
    }

    fn store_identity_key_pair(&self, identity: &IdentityKeyPair) -> Result<(), PreKeyError> {
        self.state.lock().identity_secret = Some(*identity.secret_key_bytes());
        Ok(())
    }
}

impl PreKeyStore for MemoryKeyStore {
    fn store_one_time_prekeys(&self, records: &[OneTimePreKeyRecord]) -> Result<(), PreKeyError> {
        let mut state = self.state.lock();
        for record in records {
            state.prekeys.insert(record.id(), record.clone());
        }
        Ok(())
    }

    fn load_one_time_prekey(&self, id: u32) -> Result<Option<OneTimePreKeyRecord>, PreKeyError> {
        Ok(self.state.lock().prekeys.get(&id).cloned())
    }

    fn remove_one_time_prekey(&self, id: u32) -> Result<(), PreKeyError> {
        self.state.lock().prekeys.remove(&id);
        Ok(())
    }

    fn count_one_time_prekeys(&self) -> Result<usize, PreKeyError> {
        Ok(self.state.lock().prekeys.len())
    }

    fn next_prekey_id(&self) -> Result<Option<u32>, PreKeyError> {
        Ok(self.state.lock().next_prekey_id)
    }

    fn set_next_prekey_id(&self, id: u32) -> Result<(), PreKeyError> {
        self.state.lock().next_prekey_id = Some(id);
        Ok(())
    }
}

impl SignedPreKeyStore for MemoryKeyStore {
    fn load_signed_prekey(&self, id: u32) -> Result<Option<SignedPreKeyRecord>, PreKeyError> {
        Ok(self.state.lock().signed_prekeys.get(&id).cloned())
    }

    fn load_all_signed_prekeys(&self) -> Result<Vec<SignedPreKeyRecord>, PreKeyError> {
        Ok(self.state.lock().signed_prekeys.values().cloned().collect())
    }

    fn store_signed_prekey(&self, record: &SignedPreKeyRecord) -> Result<(), PreKeyError> {
        self.state
            .lock()
            .signed_prekeys
            .insert(record.id(), record.clone());
        Ok(())
    }

    fn remove_signed_prekey(&self, id: u32) -> Result<(), PreKeyError> {
        self.state.lock().signed_prekeys.remove(&id);
        Ok(())
    }

    fn current_signed_prekey_id(&self) -> Result<Option<u32>, PreKeyError> {
        Ok(self.state.lock().current_signed_prekey_id)
    }

    fn set_current_signed_prekey_id(&self, id: u32) -> Result<(), PreKeyError> {
        self.state.lock().current_signed_prekey_id = Some(id);
        Ok(())
    }

    fn next_signed_prekey_id(&self) -> Result<Option<u32>, PreKeyError> {
        Ok(self.state.lock().next_signed_prekey_id)
    }

    fn set_next_signed_prekey_id(&self, id: u32) -> Result<(), PreKeyError> {
        self.state.lock().next_signed_prekey_id = Some(id);
        Ok(())
    }
}

impl LockoutStore for MemoryKeyStore {
    fn failure_count(&self) -> Result<u32, PreKeyError> {
        Ok(self.state.lock().failure_count)
    }

    fn increment_failure_count(&self) -> Result<u32, PreKeyError> {
        let mut state = self.state.lock();
        state.failure_count = state.failure_count.saturating_add(1);
        Ok(state.failure_count)
    }

    fn clear_failure_count(&self) -> Result<(), PreKeyError> {
        self.state.lock().failure_count = 0;
        Ok(())
    }

    fn first_failure_at(&self) -> Result<Option<u64>, PreKeyError> {
        Ok(self.state.lock().first_failure_at)
    }

    fn set_first_failure_at(&self, at_ms: u64) -> Result<(), PreKeyError> {
        self.state.lock().first_failure_at = Some(at_ms);
        Ok(())
    }

    fn clear_first_failure_at(&self) -> Result<(), PreKeyError> {
        self.state.lock().first_failure_at = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ember_crypto::{generate_one_time_prekeys, generate_signed_prekey};

    use super::*;

    #[test]
    fn identity_roundtrip() {
        let store = MemoryKeyStore::new();
        assert!(store.load_identity_key_pair().unwrap().is_none());

        let identity = IdentityKeyPair::generate();
        store.store_identity_key_pair(&identity).unwrap();
        let loaded = store.load_identity_key_pair().unwrap().unwrap();
        assert_eq!(loaded.public_key_bytes(), identity.public_key_bytes());
    }

    #[test]
    fn one_time_prekeys_store_and_consume() {
        let store = MemoryKeyStore::new();
        let batch = generate_one_time_prekeys(1, 5).unwrap();
        store.store_one_time_prekeys(&batch.records).unwrap();
        assert_eq!(store.count_one_time_prekeys().unwrap(), 5);

        let loaded = store.load_one_time_prekey(3).unwrap().unwrap();
        assert_eq!(loaded.public_key(), batch.records[2].public_key());

        store.remove_one_time_prekey(3).unwrap();
        assert!(store.load_one_time_prekey(3).unwrap().is_none());
        assert_eq!(store.count_one_time_prekeys().unwrap(), 4);
    }

    #[test]
    fn signed_prekeys_replace_by_id() {
        let store = MemoryKeyStore::new();
        let identity = IdentityKeyPair::generate();
        let mut record = generate_signed_prekey(&identity, 4, 100).unwrap();
        store.store_signed_prekey(&record).unwrap();

        record.mark_accepted();
        store.store_signed_prekey(&record).unwrap();

        let all = store.load_all_signed_prekeys().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].was_accepted());

        store.remove_signed_prekey(4).unwrap();
        assert!(store.load_signed_prekey(4).unwrap().is_none());
    }

    #[test]
    fn failure_counter_increments_and_clears() {
        let store = MemoryKeyStore::new();
        assert_eq!(store.increment_failure_count().unwrap(), 1);
        assert_eq!(store.increment_failure_count().unwrap(), 2);
        store.set_first_failure_at(77).unwrap();
        assert_eq!(store.first_failure_at().unwrap(), Some(77));

        store.clear_failure_count().unwrap();
        store.clear_first_failure_at().unwrap();
        assert_eq!(store.failure_count().unwrap(), 0);
        assert_eq!(store.first_failure_at().unwrap(), None);
    }
}
