//! The prekey gatekeeper.
//!
//! A single tokio task owns the last-check timestamp and drains one command
//! queue, so checks, registrations and sweeps never overlap. Callers on any
//! thread talk to it through a cloneable [`RotationHandle`]; every request
//! gets exactly one reply. A command that has started always runs to
//! completion, even if its caller stops waiting.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::client::KeyDistributionClient;
use crate::environment::{AppEnvironment, Clock};
use crate::error::PreKeyError;
use crate::lockout::LockoutState;
use crate::policy::{self, RotationPolicy};
use crate::refresh::{self, RefreshOutcome, SignedPreKeyRotation};
use crate::registration::{self, RegistrationMode, RegistrationOutcome, RotationContext};
use crate::retention::{self, PruneReport};
use crate::store::KeyStore;

/// Pending commands beyond this make callers wait for queue space.
const QUEUE_DEPTH: usize = 32;

type Reply<T> = oneshot::Sender<Result<T, PreKeyError>>;

enum Command {
    CheckIfNecessary(Reply<CheckOutcome>),
    Register(RegistrationMode, Reply<RegistrationOutcome>),
    Refresh(Reply<RefreshOutcome>),
    RotateSignedPreKey(Reply<SignedPreKeyRotation>),
    ClearSignedPreKeyRecords(Reply<PruneReport>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "check", rename_all = "camelCase")]
pub enum CheckOutcome {
    /// Not the primary app, or not in the foreground.
    Inactive,
    /// The last check was less than the check interval ago.
    Debounced,
    /// Due, but the account is not registered with the service yet.
    NotRegistered,
    Checked(RefreshOutcome),
}

pub struct RotationService {
    ctx: RotationContext,
    env: Arc<dyn AppEnvironment>,
    /// In-memory only; losing it on restart just means an early check.
    last_check: Option<u64>,
}

impl RotationService {
    /// Start the gatekeeper task.
    ///
    /// The task exits when [`RotationHandle::shutdown`] is called or every
    /// handle has been dropped.
    pub fn spawn(
        store: Arc<dyn KeyStore>,
        client: Arc<dyn KeyDistributionClient>,
        env: Arc<dyn AppEnvironment>,
        clock: Arc<dyn Clock>,
        policy: RotationPolicy,
    ) -> (RotationHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let ctx = RotationContext {
            store,
            client,
            clock,
            policy: Arc::new(policy),
        };
        let handle = RotationHandle {
            commands: commands_tx,
            shutdown_tx,
            ctx: ctx.clone(),
        };
        let service = Self {
            ctx,
            env,
            last_check: None,
        };
        let task = tokio::spawn(service.run(commands_rx, shutdown_rx));
        (handle, task)
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    self.handle(command).await;
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }
        tracing::debug!("prekey rotation service shutting down");
    }

    async fn handle(&mut self, command: Command) {
        // A send error means the caller gave up waiting; the work is done anyway.
        match command {
            Command::CheckIfNecessary(reply) => {
                let _ = reply.send(self.check_if_necessary().await);
            }
            Command::Register(mode, reply) => {
                self.stamp_check();
                let result = registration::register_prekeys(&self.ctx, mode).await;
                self.settle(result.as_ref().err());
                let _ = reply.send(result);
            }
            Command::Refresh(reply) => {
                self.stamp_check();
                let result = refresh::refresh(&self.ctx).await;
                self.settle(result.as_ref().err());
                let _ = reply.send(result);
            }
            Command::RotateSignedPreKey(reply) => {
                let _ = reply.send(self.rotate_signed_prekey_if_stale().await);
            }
            Command::ClearSignedPreKeyRecords(reply) => {
                let result = retention::sweep(
                    self.ctx.store.as_ref(),
                    self.ctx.clock.now_ms(),
                    &self.ctx.policy,
                );
                let _ = reply.send(result);
            }
        }
    }

    async fn check_if_necessary(&mut self) -> Result<CheckOutcome, PreKeyError> {
        if !(self.env.is_main_app() && self.env.is_app_active()) {
            return Ok(CheckOutcome::Inactive);
        }
        let now = self.ctx.clock.now_ms();
        let interval = policy::as_millis(self.ctx.policy.check_interval);
        if let Some(last) = self.last_check {
            if now.saturating_sub(last) < interval {
                tracing::debug!(last_check = last, "prekey check debounced");
                return Ok(CheckOutcome::Debounced);
            }
        }
        // Stamp before the check runs so overlapping activations coalesce.
        self.last_check = Some(now);
        if !self.env.is_registered() {
            tracing::debug!("skipping prekey check; account not registered");
            return Ok(CheckOutcome::NotRegistered);
        }

        self.stamp_check();
        let result = refresh::refresh(&self.ctx).await;
        self.settle(result.as_ref().err());
        result.map(CheckOutcome::Checked)
    }

    async fn rotate_signed_prekey_if_stale(&mut self) -> Result<SignedPreKeyRotation, PreKeyError> {
        if let Some(outcome) = refresh::signed_prekey_staleness(&self.ctx)? {
            return Ok(outcome);
        }
        self.stamp_check();
        let result = refresh::rotate_signed_prekey(&self.ctx).await;
        self.settle(result.as_ref().err());
        result
    }

    fn stamp_check(&mut self) {
        self.last_check = Some(self.ctx.clock.now_ms());
    }

    /// A failed attempt must not look like a recent successful check, so the
    /// next activation retries instead of waiting out the full interval.
    fn settle(&mut self, error: Option<&PreKeyError>) {
        if let Some(e) = error {
            tracing::debug!(error = %e, "clearing last check after failed prekey update");
            self.last_check = None;
        }
    }
}

/// Cloneable front door to the gatekeeper task.
#[derive(Clone)]
pub struct RotationHandle {
    commands: mpsc::Sender<Command>,
    shutdown_tx: mpsc::Sender<()>,
    ctx: RotationContext,
}

impl RotationHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, PreKeyError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| PreKeyError::ServiceStopped)?;
        reply_rx.await.map_err(|_| PreKeyError::ServiceStopped)?
    }

    /// Periodic check, meant to be called on every app activation.
    pub async fn check_prekeys_if_necessary(&self) -> Result<CheckOutcome, PreKeyError> {
        self.request(Command::CheckIfNecessary).await
    }

    /// Generate and upload new keys unconditionally.
    pub async fn register_prekeys(
        &self,
        mode: RegistrationMode,
    ) -> Result<RegistrationOutcome, PreKeyError> {
        self.request(|reply| Command::Register(mode, reply)).await
    }

    /// Query the service and register a full set only when one is needed.
    pub async fn refresh(&self) -> Result<RefreshOutcome, PreKeyError> {
        self.request(Command::Refresh).await
    }

    /// Upload a new signed prekey alone if the current one has reached the
    /// rotation age. Never queries the service's one-time prekey count.
    pub async fn rotate_signed_prekey_if_stale(&self) -> Result<SignedPreKeyRotation, PreKeyError> {
        self.request(Command::RotateSignedPreKey).await
    }

    /// Run the signed prekey retention sweep on its own.
    pub async fn clear_signed_prekey_records(&self) -> Result<PruneReport, PreKeyError> {
        self.request(Command::ClearSignedPreKeyRecords).await
    }

    /// Whether outbound sending must be disabled.
    ///
    /// Reads the persisted counters directly; an unreadable store does not
    /// block sending.
    pub fn is_blocked_by_sending_lockout(&self) -> bool {
        match self.lockout_state() {
            Ok(state) => state.is_blocked(self.ctx.clock.now_ms(), &self.ctx.policy),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read prekey lockout state");
                false
            }
        }
    }

    pub fn lockout_state(&self) -> Result<LockoutState, PreKeyError> {
        LockoutState::load(self.ctx.store.as_ref())
    }

    /// Stop the gatekeeper after the command in progress, if any.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}
