//! Lease-and-transaction lock protocol.

use std::future::Future;
use std::time::Duration;

use lockrun_core::cancel::Cancellation;
use lockrun_core::config::LockConfig;
use lockrun_core::error::{LockError, LockResult};
use lockrun_core::event::LockEvents;
use lockrun_core::traits::LockingSystem;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until, timeout, timeout_at};
use tracing::{debug, info, instrument, warn};

use crate::client::{CreateOutcome, KvClient, LeaseId};

/// Where the protocol currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvLockState {
    Unlocked,
    Acquiring,
    Held,
    Renewing,
    Lost,
}

/// How a holding period ended.
enum Release {
    /// Cancellation was requested; the lease has been revoked.
    Stopped,
    /// The lease could not be renewed.
    Lost,
}

/// A lock held by creating a key bound to a lease.
///
/// Acquisition polls every lease interval: grant a lease, then create the
/// key only if it has no creation record. The first writer wins. While held,
/// the lease is renewed every interval; a renewal that reports the lease
/// gone, or failures lasting past the renew deadline, end the epoch.
pub struct KvLockingSystem<C> {
    client: C,
    key: String,
    config: LockConfig,
    stopping: Cancellation,
    state: watch::Sender<KvLockState>,
}

impl<C: KvClient> KvLockingSystem<C> {
    pub fn new(client: C, key: impl Into<String>, config: LockConfig) -> Self {
        let (state, _) = watch::channel(KvLockState::Unlocked);
        Self {
            client,
            key: key.into(),
            config,
            stopping: Cancellation::new(),
            state,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Current protocol state.
    pub fn state(&self) -> KvLockState {
        *self.state.borrow()
    }

    /// Subscribes to protocol state changes.
    pub fn watch_state(&self) -> watch::Receiver<KvLockState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: KvLockState) {
        self.state.send_replace(state);
    }

    /// One acquisition attempt. Returns the lease on success, with the
    /// instant the grant was requested.
    ///
    /// Each backend call is bounded by one lease interval.
    async fn try_acquire(&self) -> LockResult<Option<(LeaseId, Instant)>> {
        let period = self.config.interval();
        let granted_at = Instant::now();
        let lease = bounded(
            period,
            "lease grant",
            self.client.grant(self.config.effective_lease_duration()),
        )
        .await?;

        let created = bounded(
            period,
            "lock transaction",
            self.client
                .create_if_absent(&self.key, self.config.identity().as_str(), lease),
        )
        .await;
        match created {
            Ok(CreateOutcome::Created) => Ok(Some((lease, granted_at))),
            Ok(CreateOutcome::Held {
                holder,
                lease: holder_lease,
            }) => {
                debug!(key = %self.key, %holder, holder_lease, "lock is held elsewhere");
                self.revoke_quietly(lease).await;
                Ok(None)
            }
            Err(e) => {
                self.revoke_quietly(lease).await;
                Err(e)
            }
        }
    }

    /// Renews the lease until cancellation or loss.
    ///
    /// The lease counts as valid from the moment the last successful
    /// request was sent. Without a successful renewal for the renew
    /// deadline, the lock is given up before the backend expires it.
    async fn hold(&self, lease: LeaseId, granted_at: Instant, cancel: &Cancellation) -> Release {
        let period = self.config.interval();
        let deadline = self.config.renew_deadline();
        let mut ticker = interval_at(granted_at + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut renewed_at = granted_at;

        loop {
            let give_up_at = renewed_at + deadline;
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.revoke_quietly(lease).await;
                    return Release::Stopped;
                }
                _ = sleep_until(give_up_at) => {
                    warn!(lease, ?deadline, "no successful lease renewal within the renew deadline");
                    self.revoke_quietly(lease).await;
                    return Release::Lost;
                }
                _ = ticker.tick() => {}
            }

            self.set_state(KvLockState::Renewing);
            let attempt_at = Instant::now();
            let budget_end = give_up_at.min(attempt_at + period);
            let renewal = match timeout_at(budget_end, self.client.keep_alive(lease)).await {
                Ok(result) => result,
                Err(_) => Err(LockError::connection(format!(
                    "lease renewal timed out after {:?}",
                    budget_end.saturating_duration_since(attempt_at)
                ))),
            };
            match renewal {
                Ok(Some(ttl)) => {
                    renewed_at = attempt_at;
                    debug!(lease, ?ttl, "lease renewed");
                    self.set_state(KvLockState::Held);
                }
                Ok(None) => {
                    warn!(lease, "lease expired or was revoked");
                    return Release::Lost;
                }
                Err(e) if Instant::now() < give_up_at => {
                    warn!(lease, error = %e, "lease renewal failed, will retry");
                    self.set_state(KvLockState::Held);
                }
                Err(e) => {
                    warn!(lease, error = %e, "lease renewal failed past the renew deadline");
                    self.revoke_quietly(lease).await;
                    return Release::Lost;
                }
            }
        }
    }

    async fn run_protocol(&self, cancel: &Cancellation, events: &mut LockEvents) -> LockResult<()> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            self.set_state(KvLockState::Acquiring);
            // Not raced against cancellation: a lease or key written by a
            // half-finished attempt would otherwise be left behind.
            let Some((lease, granted_at)) = self.try_acquire().await? else {
                self.set_state(KvLockState::Unlocked);
                if self.backoff(cancel).await {
                    continue;
                }
                return Ok(());
            };
            if cancel.is_cancelled() {
                debug!(lease, "acquired while stopping, releasing");
                self.revoke_quietly(lease).await;
                return Ok(());
            }

            info!(lease, "lock acquired");
            self.set_state(KvLockState::Held);
            if let Err(e) = events.acquired().await {
                self.revoke_quietly(lease).await;
                return Err(e);
            }

            match self.hold(lease, granted_at, cancel).await {
                Release::Stopped => {
                    info!(lease, "lock released");
                    self.set_state(KvLockState::Unlocked);
                    return events.close_epoch().await;
                }
                Release::Lost => {
                    warn!(lease, "lock lost");
                    self.set_state(KvLockState::Lost);
                    events.lost().await?;
                    self.set_state(KvLockState::Unlocked);
                }
            }
        }
    }

    /// Waits one polling interval, returning `false` if cancelled meanwhile.
    async fn backoff(&self, cancel: &Cancellation) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.config.interval()) => true,
        }
    }

    /// Best-effort revoke, bounded by one lease interval.
    async fn revoke_quietly(&self, lease: LeaseId) {
        match timeout(self.config.interval(), self.client.revoke(lease)).await {
            Ok(Ok(())) => debug!(lease, "lease revoked"),
            Ok(Err(e)) => debug!(lease, error = %e, "failed to revoke lease"),
            Err(_) => debug!(lease, "timed out revoking lease"),
        }
    }
}

/// Runs one backend call, failing with a connection error after `limit`.
async fn bounded<T>(
    limit: Duration,
    what: &str,
    call: impl Future<Output = LockResult<T>>,
) -> LockResult<T> {
    timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(LockError::connection(format!("{what} timed out after {limit:?}"))))
}

impl<C: KvClient> LockingSystem for KvLockingSystem<C> {
    fn backend(&self) -> &'static str {
        "kv-transaction"
    }

    #[instrument(skip_all, fields(backend = "kv-transaction", key = %self.key, identity = %self.config.identity()))]
    async fn run(&self, cancel: Cancellation, mut events: LockEvents) -> LockResult<()> {
        let cancel = cancel.merged(&self.stopping);
        let result = self.run_protocol(&cancel, &mut events).await;
        // Also ends the helper task behind the merged token.
        cancel.cancel();
        self.set_state(KvLockState::Unlocked);
        result
    }

    fn stop(&self) {
        self.stopping.cancel();
    }

    async fn close(self) -> LockResult<()> {
        debug!(key = %self.key, "closing kv-transaction client");
        drop(self);
        Ok(())
    }
}
