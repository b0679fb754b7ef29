//! One-time and signed pre-key material.
//!
//! One-time pre-keys are generated in batches with consecutive ids; the
//! signed pre-key is an X25519 key whose public half is signed by the
//! identity key. Only the public halves ever leave this crate via
//! [`PublicPreKey`] and [`PublicSignedPreKey`].

use rand::Rng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;
use crate::identity::IdentityKeyPair;

/// Largest pre-key id. Ids live in `1..=MAX_PREKEY_ID` and wrap around.
pub const MAX_PREKEY_ID: u32 = 0x00FF_FFFF;

/// The id following `id`, wrapping back to 1 after [`MAX_PREKEY_ID`].
pub fn next_prekey_id(id: u32) -> u32 {
    if id == 0 || id >= MAX_PREKEY_ID {
        1
    } else {
        id + 1
    }
}

/// A random starting point for a fresh id sequence.
pub fn random_prekey_id() -> u32 {
    rand::rngs::OsRng.gen_range(1..=MAX_PREKEY_ID)
}

fn generate_x25519() -> ([u8; 32], [u8; 32]) {
    let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let public = X25519Public::from(&secret);
    (secret.to_bytes(), public.to_bytes())
}

/// A single-use pre-key.
#[derive(Clone, ZeroizeOnDrop)]
pub struct OneTimePreKeyRecord {
    #[zeroize(skip)]
    id: u32,
    secret: [u8; 32],
    #[zeroize(skip)]
    public: [u8; 32],
}

impl OneTimePreKeyRecord {
    pub fn from_parts(id: u32, secret: [u8; 32], public: [u8; 32]) -> Self {
        Self { id, secret, public }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public
    }

    pub fn secret_key(&self) -> &[u8; 32] {
        &self.secret
    }

    pub fn to_public(&self) -> PublicPreKey {
        PublicPreKey {
            id: self.id,
            public_key: hex::encode(self.public),
        }
    }
}

impl std::fmt::Debug for OneTimePreKeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneTimePreKeyRecord")
            .field("id", &self.id)
            .field("public", &hex::encode(self.public))
            .finish_non_exhaustive()
    }
}

/// A freshly generated run of one-time pre-keys with consecutive ids.
#[derive(Debug, Clone)]
pub struct PreKeyBatch {
    pub records: Vec<OneTimePreKeyRecord>,
    /// The id the following batch must start from.
    pub next_id: u32,
}

/// Generate `count` one-time pre-keys starting at `start_id`.
pub fn generate_one_time_prekeys(start_id: u32, count: u32) -> Result<PreKeyBatch, CryptoError> {
    if count == 0 || count >= MAX_PREKEY_ID {
        return Err(CryptoError::KeyGeneration(format!(
            "invalid one-time prekey batch size {count}"
        )));
    }
    let mut id = if start_id == 0 { 1 } else { start_id };
    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (secret, public) = generate_x25519();
        records.push(OneTimePreKeyRecord::from_parts(id, secret, public));
        id = next_prekey_id(id);
    }
    Ok(PreKeyBatch {
        records,
        next_id: id,
    })
}

/// A signed pre-key together with its bookkeeping.
///
/// `generated_at` is milliseconds since the UNIX epoch. `accepted` flips to
/// true once the key distribution service has acknowledged the key.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SignedPreKeyRecord {
    #[zeroize(skip)]
    id: u32,
    secret: [u8; 32],
    #[zeroize(skip)]
    public: [u8; 32],
    #[zeroize(skip)]
    signature: Vec<u8>,
    #[zeroize(skip)]
    generated_at: u64,
    #[zeroize(skip)]
    accepted: bool,
}

impl SignedPreKeyRecord {
    pub fn from_parts(
        id: u32,
        secret: [u8; 32],
        public: [u8; 32],
        signature: Vec<u8>,
        generated_at: u64,
        accepted: bool,
    ) -> Self {
        Self {
            id,
            secret,
            public,
            signature,
            generated_at,
            accepted,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public
    }

    pub fn secret_key(&self) -> &[u8; 32] {
        &self.secret
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn generated_at(&self) -> u64 {
        self.generated_at
    }

    pub fn was_accepted(&self) -> bool {
        self.accepted
    }

    pub fn mark_accepted(&mut self) {
        self.accepted = true;
    }

    /// Age at `now_ms`. A timestamp in the future counts as age zero.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.generated_at)
    }

    /// Check the signature over the public key against an identity key.
    pub fn verify(&self, identity_public: &[u8; 32]) -> Result<(), CryptoError> {
        IdentityKeyPair::verify(identity_public, &self.public, &self.signature)
    }

    pub fn to_public(&self) -> PublicSignedPreKey {
        PublicSignedPreKey {
            id: self.id,
            public_key: hex::encode(self.public),
            signature: hex::encode(&self.signature),
        }
    }
}

impl std::fmt::Debug for SignedPreKeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedPreKeyRecord")
            .field("id", &self.id)
            .field("public", &hex::encode(self.public))
            .field("generated_at", &self.generated_at)
            .field("accepted", &self.accepted)
            .finish_non_exhaustive()
    }
}

/// Generate a signed pre-key with the given id, stamped `now_ms`.
pub fn generate_signed_prekey(
    identity: &IdentityKeyPair,
    id: u32,
    now_ms: u64,
) -> Result<SignedPreKeyRecord, CryptoError> {
    if id == 0 || id > MAX_PREKEY_ID {
        return Err(CryptoError::KeyGeneration(format!(
            "signed prekey id {id} out of range"
        )));
    }
    let (secret, public) = generate_x25519();
    let signature = identity.sign(&public).to_vec();
    Ok(SignedPreKeyRecord::from_parts(
        id, secret, public, signature, now_ms, false,
    ))
}

/// Public half of a one-time pre-key, as uploaded to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicPreKey {
    #[serde(rename = "keyId")]
    pub id: u32,
    /// Hex-encoded X25519 public key.
    pub public_key: String,
}

/// Public half of a signed pre-key, as uploaded to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicSignedPreKey {
    #[serde(rename = "keyId")]
    pub id: u32,
    pub public_key: String,
    pub signature: String,
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn batch_ids_are_consecutive() {
        let batch = generate_one_time_prekeys(10, 100).unwrap();
        assert_eq!(batch.records.len(), 100);
        let ids: Vec<u32> = batch.records.iter().map(OneTimePreKeyRecord::id).collect();
        assert_eq!(ids.first(), Some(&10));
        assert_eq!(ids.last(), Some(&109));
        assert_eq!(batch.next_id, 110);
    }

    #[test]
    fn batch_wraps_past_max_id() {
        let batch = generate_one_time_prekeys(MAX_PREKEY_ID - 1, 4).unwrap();
        let ids: Vec<u32> = batch.records.iter().map(OneTimePreKeyRecord::id).collect();
        assert_eq!(ids, vec![MAX_PREKEY_ID - 1, MAX_PREKEY_ID, 1, 2]);
        assert_eq!(batch.next_id, 3);
    }

    #[test]
    fn batch_keys_are_distinct() {
        let batch = generate_one_time_prekeys(1, 50).unwrap();
        let publics: HashSet<[u8; 32]> = batch.records.iter().map(|r| *r.public_key()).collect();
        assert_eq!(publics.len(), 50);
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(generate_one_time_prekeys(1, 0).is_err());
    }

    #[test]
    fn next_id_skips_zero() {
        assert_eq!(next_prekey_id(0), 1);
        assert_eq!(next_prekey_id(7), 8);
        assert_eq!(next_prekey_id(MAX_PREKEY_ID), 1);
        let start = random_prekey_id();
        assert!((1..=MAX_PREKEY_ID).contains(&start));
    }

    #[test]
    fn signed_prekey_verifies_against_identity() {
        let identity = IdentityKeyPair::generate();
        let record = generate_signed_prekey(&identity, 5, 1_000).unwrap();
        assert_eq!(record.id(), 5);
        assert_eq!(record.generated_at(), 1_000);
        assert!(!record.was_accepted());
        assert!(record.verify(&identity.public_key_bytes()).is_ok());

        let stranger = IdentityKeyPair::generate();
        assert!(record.verify(&stranger.public_key_bytes()).is_err());
    }

    #[test]
    fn signed_prekey_age_saturates() {
        let identity = IdentityKeyPair::generate();
        let record = generate_signed_prekey(&identity, 1, 5_000).unwrap();
        assert_eq!(record.age_ms(8_000), 3_000);
        assert_eq!(record.age_ms(1_000), 0);
    }

    #[test]
    fn signed_prekey_id_zero_is_rejected() {
        let identity = IdentityKeyPair::generate();
        assert!(generate_signed_prekey(&identity, 0, 0).is_err());
    }

    #[test]
    fn public_forms_serialize_without_secrets() {
        let identity = IdentityKeyPair::generate();
        let record = generate_signed_prekey(&identity, 9, 0).unwrap();
        let json = serde_json::to_value(record.to_public()).unwrap();
        assert_eq!(json["keyId"], 9);
        assert_eq!(json["publicKey"], hex::encode(record.public_key()));
        assert_eq!(json["signature"], hex::encode(record.signature()));
        assert!(!json.to_string().contains(&hex::encode(record.secret_key())));
    }
}
