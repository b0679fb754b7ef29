//! Shared test doubles for the rotation integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use ember_prekeys::{
    KeyDistributionClient, KeyStore, ManualClock, PreKeyError, RegistrationRequest,
    RotationHandle, RotationPolicy, RotationService, StaticEnvironment,
};

pub const NOW: u64 = 1_700_000_000_000;
pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);
pub const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// A scripted key distribution service.
///
/// Registrations succeed unless a response was queued with
/// [`FakeClient::push_response`].
#[derive(Default)]
pub struct FakeClient {
    remote_count: AtomicU32,
    count_errors: Mutex<VecDeque<PreKeyError>>,
    responses: Mutex<VecDeque<Result<(), PreKeyError>>>,
    requests: Mutex<Vec<RegistrationRequest>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    observer: Option<Arc<dyn KeyStore>>,
    observed_signed_counts: Mutex<Vec<usize>>,
}

impl FakeClient {
    pub fn new(remote_count: u32) -> Self {
        Self {
            remote_count: AtomicU32::new(remote_count),
            ..Self::default()
        }
    }

    /// Hold every registration for `delay` and record how many signed
    /// prekeys `store` holds when each one arrives.
    pub fn slow_observing(remote_count: u32, delay: Duration, store: Arc<dyn KeyStore>) -> Self {
        Self {
            delay,
            observer: Some(store),
            ..Self::new(remote_count)
        }
    }

    pub fn set_remote_count(&self, count: u32) {
        self.remote_count.store(count, Ordering::SeqCst);
    }

    pub fn push_response(&self, response: Result<(), PreKeyError>) {
        self.responses.lock().push_back(response);
    }

    pub fn push_count_error(&self, error: PreKeyError) {
        self.count_errors.lock().push_back(error);
    }

    pub fn requests(&self) -> Vec<RegistrationRequest> {
        self.requests.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn observed_signed_counts(&self) -> Vec<usize> {
        self.observed_signed_counts.lock().clone()
    }
}

impl KeyDistributionClient for FakeClient {
    fn remote_prekey_count(&self) -> BoxFuture<'_, Result<u32, PreKeyError>> {
        Box::pin(async move {
            if let Some(e) = self.count_errors.lock().pop_front() {
                return Err(e);
            }
            Ok(self.remote_count.load(Ordering::SeqCst))
        })
    }

    fn register_keys(&self, request: RegistrationRequest) -> BoxFuture<'_, Result<(), PreKeyError>> {
        Box::pin(async move {
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);
            if let Some(store) = &self.observer {
                let count = store.load_all_signed_prekeys().map_or(0, |all| all.len());
                self.observed_signed_counts.lock().push(count);
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.requests.lock().push(request);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.responses.lock().pop_front().unwrap_or(Ok(()))
        })
    }
}

pub fn rejected(status: u16) -> PreKeyError {
    PreKeyError::ServiceRejected {
        status,
        reason: "rejected".into(),
    }
}

pub fn transport() -> PreKeyError {
    PreKeyError::Transport("connection reset".into())
}

pub struct Harness {
    pub store: Arc<dyn KeyStore>,
    pub client: Arc<FakeClient>,
    pub env: Arc<StaticEnvironment>,
    pub clock: Arc<ManualClock>,
    pub handle: RotationHandle,
    pub task: tokio::task::JoinHandle<()>,
}

pub fn start(store: Arc<dyn KeyStore>, client: FakeClient) -> Harness {
    let client = Arc::new(client);
    let env = Arc::new(StaticEnvironment::default());
    let clock = Arc::new(ManualClock::new(NOW));
    let (handle, task) = RotationService::spawn(
        Arc::clone(&store),
        client.clone(),
        env.clone(),
        clock.clone(),
        RotationPolicy::default(),
    );
    Harness {
        store,
        client,
        env,
        clock,
        handle,
        task,
    }
}
