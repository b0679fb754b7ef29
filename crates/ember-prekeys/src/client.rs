//! The remote side of pre-key registration.
//!
//! Implementations own the transport and its retry/backoff. They must
//! classify failures: [`PreKeyError::Transport`] when no response arrived,
//! [`PreKeyError::ServiceRejected`] for any error status the service sent.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use ember_crypto::{
    IdentityKeyPair, OneTimePreKeyRecord, PublicPreKey, PublicSignedPreKey, SignedPreKeyRecord,
};

use crate::error::PreKeyError;

/// Upload payload: the identity key, a signed prekey and, for full
/// replenishments, a batch of one-time prekeys. Public halves only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    /// Hex-encoded Ed25519 identity public key.
    pub identity_key: String,
    pub signed_pre_key: PublicSignedPreKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_keys: Option<Vec<PublicPreKey>>,
}

impl RegistrationRequest {
    pub fn new(
        identity: &IdentityKeyPair,
        signed_prekey: &SignedPreKeyRecord,
        one_time_prekeys: Option<&[OneTimePreKeyRecord]>,
    ) -> Self {
        Self {
            identity_key: identity.public_key_hex(),
            signed_pre_key: signed_prekey.to_public(),
            pre_keys: one_time_prekeys
                .map(|records| records.iter().map(OneTimePreKeyRecord::to_public).collect()),
        }
    }
}

pub trait KeyDistributionClient: Send + Sync {
    /// Number of our one-time prekeys the service still holds.
    fn remote_prekey_count(&self) -> BoxFuture<'_, Result<u32, PreKeyError>>;

    /// Register (replace) our keys with the service.
    fn register_keys(&self, request: RegistrationRequest) -> BoxFuture<'_, Result<(), PreKeyError>>;
}
