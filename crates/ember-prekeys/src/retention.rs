//! Signed prekey retention.
//!
//! Peers may cache an old signed prekey and start a session with it long
//! after we rotated, so pruning is conservative: the current key is never a
//! candidate, a floor of non-current keys and of service-accepted keys is
//! always kept, and nothing younger than the deletion age is touched.

use serde::Serialize;

use ember_crypto::SignedPreKeyRecord;

use crate::error::PreKeyError;
use crate::policy::{self, RotationPolicy};
use crate::store::SignedPreKeyStore;

/// Ids of signed prekeys that may be deleted, oldest first.
pub fn select_for_deletion(
    records: &[SignedPreKeyRecord],
    current_id: Option<u32>,
    now_ms: u64,
    policy: &RotationPolicy,
) -> Vec<u32> {
    let mut candidates: Vec<&SignedPreKeyRecord> = records
        .iter()
        .filter(|r| Some(r.id()) != current_id)
        .collect();
    candidates.sort_by_key(|r| (r.generated_at(), r.id()));

    let deletion_age = policy::as_millis(policy.signed_prekey_deletion_age);
    let mut remaining = candidates.len();
    let mut accepted_remaining = candidates.iter().filter(|r| r.was_accepted()).count();
    let mut doomed = Vec::new();

    for candidate in candidates {
        if remaining <= policy.min_retained_signed_prekeys {
            continue;
        }
        if candidate.age_ms(now_ms) < deletion_age {
            continue;
        }
        if candidate.was_accepted() {
            if accepted_remaining <= policy.min_retained_accepted_signed_prekeys {
                continue;
            }
            accepted_remaining -= 1;
        }
        remaining -= 1;
        doomed.push(candidate.id());
    }
    doomed
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneReport {
    pub deleted: Vec<u32>,
    pub retained: Vec<u32>,
}

/// Delete expired signed prekeys from `store`.
///
/// Best effort: a failed removal is logged and the sweep moves on.
pub fn sweep<S: SignedPreKeyStore + ?Sized>(
    store: &S,
    now_ms: u64,
    policy: &RotationPolicy,
) -> Result<PruneReport, PreKeyError> {
    let records = store.load_all_signed_prekeys()?;
    let current_id = store.current_signed_prekey_id()?;
    if let Some(id) = current_id {
        if !records.iter().any(|r| r.id() == id) {
            let e = PreKeyError::LocalStateInconsistent(format!(
                "current signed prekey {id} missing from store"
            ));
            tracing::warn!(error = %e, "pruning around a missing current signed prekey");
        }
    }

    let mut report = PruneReport::default();
    for id in select_for_deletion(&records, current_id, now_ms, policy) {
        match store.remove_signed_prekey(id) {
            Ok(()) => {
                tracing::info!(signed_prekey_id = id, "pruned expired signed prekey");
                report.deleted.push(id);
            }
            Err(e) => {
                tracing::warn!(signed_prekey_id = id, error = %e, "failed to prune signed prekey");
            }
        }
    }
    report.retained = records
        .iter()
        .map(SignedPreKeyRecord::id)
        .filter(|id| !report.deleted.contains(id))
        .collect();
    Ok(report)
}
