use serde::Serialize;

use ember_crypto::SignedPreKeyRecord;

use crate::error::PreKeyError;
use crate::policy;
use crate::registration::{self, RegistrationMode, RegistrationOutcome, RotationContext};
use crate::store::KeyStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "refresh", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RefreshOutcome {
    /// The service holds enough one-time prekeys and a current signed prekey exists.
    UpToDate { remote_prekeys: u32 },
    Registered(RegistrationOutcome),
}

/// Load the record the current signed prekey id points at.
fn current_signed_prekey(store: &dyn KeyStore) -> Result<Option<SignedPreKeyRecord>, PreKeyError> {
    let Some(id) = store.current_signed_prekey_id()? else {
        return Ok(None);
    };
    let record = store.load_signed_prekey(id)?;
    if record.is_none() {
        let e = PreKeyError::LocalStateInconsistent(format!(
            "current signed prekey {id} missing from store"
        ));
        tracing::warn!(error = %e, "treating signed prekey as absent");
    }
    Ok(record)
}

/// Compare remote and local state and register a full set when one is needed.
///
/// The age of the signed prekey plays no part here; see
/// [`signed_prekey_staleness`].
///
/// A failure to fetch the remote count gets the same lockout treatment as a
/// failed registration.
pub(crate) async fn refresh(ctx: &RotationContext) -> Result<RefreshOutcome, PreKeyError> {
    let remote_prekeys = match ctx.client.remote_prekey_count().await {
        Ok(count) => count,
        Err(e) => {
            ctx.note_failure(&e);
            return Err(e);
        }
    };
    let current = current_signed_prekey(ctx.store.as_ref())?;

    let reason = match current {
        None => "no current signed prekey",
        Some(_) if remote_prekeys < ctx.policy.min_remote_prekeys => "one-time prekeys running low",
        Some(_) => {
            tracing::debug!(remote_prekeys, "prekeys up to date");
            return Ok(RefreshOutcome::UpToDate { remote_prekeys });
        }
    };
    tracing::info!(remote_prekeys, reason, "replenishing prekeys");

    registration::register_prekeys(ctx, RegistrationMode::SignedAndOneTime)
        .await
        .map(RefreshOutcome::Registered)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rotation", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SignedPreKeyRotation {
    /// No current signed prekey; a refresh registers a full set instead.
    Missing,
    /// The current signed prekey is younger than the rotation age.
    Fresh { signed_prekey_id: u32, age_ms: u64 },
    Rotated(RegistrationOutcome),
}

/// Check whether the current signed prekey has reached the rotation age.
///
/// Returns the outcome to report when no rotation is due, or `None` when a
/// replacement should be uploaded. Only reads local state.
pub(crate) fn signed_prekey_staleness(
    ctx: &RotationContext,
) -> Result<Option<SignedPreKeyRotation>, PreKeyError> {
    let Some(record) = current_signed_prekey(ctx.store.as_ref())? else {
        return Ok(Some(SignedPreKeyRotation::Missing));
    };
    let age_ms = record.age_ms(ctx.clock.now_ms());
    if age_ms < policy::as_millis(ctx.policy.signed_prekey_rotation_age) {
        return Ok(Some(SignedPreKeyRotation::Fresh {
            signed_prekey_id: record.id(),
            age_ms,
        }));
    }
    tracing::info!(signed_prekey_id = record.id(), age_ms, "signed prekey due for rotation");
    Ok(None)
}

/// Upload a replacement signed prekey alone.
pub(crate) async fn rotate_signed_prekey(
    ctx: &RotationContext,
) -> Result<SignedPreKeyRotation, PreKeyError> {
    registration::register_prekeys(ctx, RegistrationMode::SignedOnly)
        .await
        .map(SignedPreKeyRotation::Rotated)
}
