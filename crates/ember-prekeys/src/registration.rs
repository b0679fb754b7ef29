//! The registration attempt shared by every path that uploads keys.
//!
//! Key material is written to the store before the network call. A crash or
//! failure mid-attempt leaves an extra unaccepted signed prekey and unused
//! one-time prekeys behind, both harmless, and never loses material the
//! service may already hold.

use std::sync::Arc;

use serde::Serialize;

use ember_crypto::{
    generate_one_time_prekeys, generate_signed_prekey, next_prekey_id, random_prekey_id,
    IdentityKeyPair,
};

use crate::client::{KeyDistributionClient, RegistrationRequest};
use crate::environment::Clock;
use crate::error::PreKeyError;
use crate::lockout;
use crate::policy::RotationPolicy;
use crate::retention;
use crate::store::KeyStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegistrationMode {
    /// Rotate the signed prekey only.
    SignedOnly,
    /// Upload a new signed prekey and a fresh batch of one-time prekeys.
    SignedAndOneTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOutcome {
    /// The mode actually used; a missing identity forces a full upload.
    pub mode: RegistrationMode,
    pub signed_prekey_id: u32,
    pub one_time_prekeys: usize,
    /// Signed prekeys removed by the post-registration sweep.
    pub pruned: Vec<u32>,
}

/// Collaborators shared by the registration and refresh paths.
#[derive(Clone)]
pub(crate) struct RotationContext {
    pub store: Arc<dyn KeyStore>,
    pub client: Arc<dyn KeyDistributionClient>,
    pub clock: Arc<dyn Clock>,
    pub policy: Arc<RotationPolicy>,
}

impl RotationContext {
    /// Book-keeping for a failed attempt: rejections by the service
    /// advance the lockout streak.
    pub fn note_failure(&self, error: &PreKeyError) {
        if !error.counts_toward_lockout() {
            tracing::warn!(error = %error, "prekey update failed; not counted toward lockout");
            return;
        }
        match lockout::record_failure(self.store.as_ref(), self.clock.now_ms()) {
            Ok(state) => tracing::warn!(
                error = %error,
                failure_count = state.failure_count,
                first_failure_at = ?state.first_failure_at,
                "prekey update rejected by service"
            ),
            Err(e) => tracing::error!(error = %e, "failed to record prekey update failure"),
        }
    }
}

/// Run one registration attempt and apply its success or failure effects.
pub(crate) async fn register_prekeys(
    ctx: &RotationContext,
    mode: RegistrationMode,
) -> Result<RegistrationOutcome, PreKeyError> {
    let result = attempt(ctx, mode).await;
    if let Err(e) = &result {
        ctx.note_failure(e);
    }
    result
}

fn load_or_create_identity(
    store: &dyn KeyStore,
    requested: RegistrationMode,
) -> Result<(IdentityKeyPair, RegistrationMode), PreKeyError> {
    if let Some(identity) = store.load_identity_key_pair()? {
        return Ok((identity, requested));
    }
    let identity = IdentityKeyPair::generate();
    store.store_identity_key_pair(&identity)?;
    tracing::info!(
        identity = %identity.public_key_hex(),
        "generated new identity key; forcing full prekey upload"
    );
    Ok((identity, RegistrationMode::SignedAndOneTime))
}

async fn attempt(
    ctx: &RotationContext,
    requested: RegistrationMode,
) -> Result<RegistrationOutcome, PreKeyError> {
    let store = ctx.store.as_ref();
    let (identity, mode) = load_or_create_identity(store, requested)?;

    let signed_prekey_id = store
        .next_signed_prekey_id()?
        .unwrap_or_else(random_prekey_id);
    store.set_next_signed_prekey_id(next_prekey_id(signed_prekey_id))?;
    let mut signed = generate_signed_prekey(&identity, signed_prekey_id, ctx.clock.now_ms())?;
    store.store_signed_prekey(&signed)?;

    let batch = match mode {
        RegistrationMode::SignedOnly => None,
        RegistrationMode::SignedAndOneTime => {
            let start = store.next_prekey_id()?.unwrap_or_else(random_prekey_id);
            let batch = generate_one_time_prekeys(start, ctx.policy.prekey_batch_size)?;
            store.set_next_prekey_id(batch.next_id)?;
            store.store_one_time_prekeys(&batch.records)?;
            Some(batch)
        }
    };
    let one_time_prekeys = batch.as_ref().map_or(0, |b| b.records.len());

    tracing::info!(
        ?mode,
        signed_prekey_id,
        one_time_prekeys,
        "registering prekeys with service"
    );
    let request = RegistrationRequest::new(
        &identity,
        &signed,
        batch.as_ref().map(|b| b.records.as_slice()),
    );
    ctx.client.register_keys(request).await?;

    signed.mark_accepted();
    store.store_signed_prekey(&signed)?;
    store.set_current_signed_prekey_id(signed_prekey_id)?;
    lockout::clear(store)?;
    tracing::info!(signed_prekey_id, "prekeys accepted by service");

    let pruned = match retention::sweep(store, ctx.clock.now_ms(), &ctx.policy) {
        Ok(report) => report.deleted,
        Err(e) => {
            tracing::warn!(error = %e, "signed prekey sweep failed after registration");
            Vec::new()
        }
    };

    Ok(RegistrationOutcome {
        mode,
        signed_prekey_id,
        one_time_prekeys,
        pruned,
    })
}
