//! The rotation service over a real `SQLite` file: state written by one
//! process lifetime must drive the next.

mod common;

use std::sync::Arc;

use ember_prekeys::{
    KeyStore, LockoutState, RefreshOutcome, RegistrationMode, SignedPreKeyRotation, SqliteKeyStore,
};

use common::{rejected, start, FakeClient, DAY};

fn open(dir: &tempfile::TempDir) -> Arc<dyn KeyStore> {
    Arc::new(SqliteKeyStore::open(&dir.path().join("prekeys.db")).expect("open sqlite store"))
}

#[tokio::test]
async fn registration_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();

    let signed_prekey_id = {
        let h = start(open(&dir), FakeClient::new(0));
        let outcome = h
            .handle
            .register_prekeys(RegistrationMode::SignedAndOneTime)
            .await
            .unwrap();
        h.handle.shutdown().await;
        h.task.await.unwrap();
        outcome.signed_prekey_id
    };

    let h = start(open(&dir), FakeClient::new(50));
    assert_eq!(
        h.store.current_signed_prekey_id().unwrap(),
        Some(signed_prekey_id)
    );
    assert_eq!(h.store.count_one_time_prekeys().unwrap(), 100);

    // Same identity and a current signed key: nothing to do after the restart.
    let outcome = h.handle.refresh().await.unwrap();
    assert_eq!(outcome, RefreshOutcome::UpToDate { remote_prekeys: 50 });
}

#[tokio::test]
async fn lockout_streak_persists_across_restarts() {
    let dir = tempfile::TempDir::new().unwrap();

    for _ in 0..5 {
        let h = start(open(&dir), FakeClient::new(0));
        h.client.push_response(Err(rejected(500)));
        assert!(h
            .handle
            .register_prekeys(RegistrationMode::SignedAndOneTime)
            .await
            .is_err());
    }

    let h = start(open(&dir), FakeClient::new(0));
    let state = h.handle.lockout_state().unwrap();
    assert_eq!(state.failure_count, 5);
    assert!(!h.handle.is_blocked_by_sending_lockout());

    h.clock.advance(10 * DAY);
    assert!(h.handle.is_blocked_by_sending_lockout());

    h.handle
        .register_prekeys(RegistrationMode::SignedAndOneTime)
        .await
        .unwrap();
    assert_eq!(h.handle.lockout_state().unwrap(), LockoutState::default());
    assert!(!h.handle.is_blocked_by_sending_lockout());
}

#[tokio::test]
async fn rotations_over_weeks_keep_a_bounded_inventory() {
    let dir = tempfile::TempDir::new().unwrap();
    let h = start(open(&dir), FakeClient::new(50));

    h.handle.refresh().await.unwrap();
    // One rotation every three days for two months.
    for _ in 0..20 {
        h.clock.advance(3 * DAY);
        let outcome = h.handle.rotate_signed_prekey_if_stale().await.unwrap();
        assert!(matches!(outcome, SignedPreKeyRotation::Rotated(_)));
    }

    let all = h.store.load_all_signed_prekeys().unwrap();
    let current = h.store.current_signed_prekey_id().unwrap().unwrap();
    assert!(all.iter().any(|r| r.id() == current));
    // Current key, three retained old keys, and keys still inside the
    // seven-day window.
    assert!(all.len() <= 6, "kept {} signed prekeys", all.len());
    assert!(all.len() >= 4);
}
