//! In-memory key-value store with leases, for driving the kv-transaction
//! protocol without etcd.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lockrun_core::error::{LockError, LockResult};
use lockrun_etcd::{CreateOutcome, KvClient, LeaseId};
use tokio::time::Instant;

/// A shared store; clones see the same keys and leases.
#[derive(Clone, Default)]
pub struct MemoryKv {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    next_lease: LeaseId,
    leases: HashMap<LeaseId, Lease>,
    keys: HashMap<String, (String, LeaseId)>,
    keep_alive_failing: bool,
    keep_alive_hanging: bool,
    create_delay: Duration,
    unreachable: bool,
    revoked: usize,
}

struct Lease {
    ttl: Duration,
    expires: Instant,
}

impl State {
    /// Drops expired leases and the keys bound to them.
    fn purge(&mut self) {
        let now = Instant::now();
        self.leases.retain(|_, lease| lease.expires > now);
        let leases = &self.leases;
        self.keys.retain(|_, (_, lease)| leases.contains_key(lease));
    }

    fn remove_lease(&mut self, id: LeaseId) {
        self.leases.remove(&id);
        self.keys.retain(|_, (_, lease)| *lease != id);
    }

    fn check_reachable(&self) -> LockResult<()> {
        if self.unreachable {
            return Err(LockError::connection("memory store is unreachable"));
        }
        Ok(())
    }
}

impl MemoryKv {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Identity stored under `key`, if the key exists.
    pub fn holder(&self, key: &str) -> Option<String> {
        let mut state = self.state();
        state.purge();
        state.keys.get(key).map(|(holder, _)| holder.clone())
    }

    /// Ends the lease bound to `key` behind its holder's back.
    pub fn expire_key(&self, key: &str) {
        let mut state = self.state();
        if let Some((_, lease)) = state.keys.get(key).cloned() {
            state.remove_lease(lease);
        }
    }

    /// Writes `key` under a fresh lease, as another node would.
    pub fn seed(&self, key: &str, holder: &str, ttl: Duration) -> LeaseId {
        let mut state = self.state();
        state.next_lease += 1;
        let id = state.next_lease;
        state.leases.insert(
            id,
            Lease {
                ttl,
                expires: Instant::now() + ttl,
            },
        );
        state.keys.insert(key.to_string(), (holder.to_string(), id));
        id
    }

    pub fn set_keep_alive_failing(&self, failing: bool) {
        self.state().keep_alive_failing = failing;
    }

    /// Makes keep-alive calls never complete.
    pub fn set_keep_alive_hanging(&self, hanging: bool) {
        self.state().keep_alive_hanging = hanging;
    }

    /// Delays every conditional create by `delay`.
    pub fn set_create_delay(&self, delay: Duration) {
        self.state().create_delay = delay;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Number of live leases.
    pub fn live_leases(&self) -> usize {
        let mut state = self.state();
        state.purge();
        state.leases.len()
    }

    /// Number of successful revocations.
    pub fn revoked(&self) -> usize {
        self.state().revoked
    }
}

impl KvClient for MemoryKv {
    async fn grant(&self, ttl: Duration) -> LockResult<LeaseId> {
        let mut state = self.state();
        state.check_reachable()?;
        state.next_lease += 1;
        let id = state.next_lease;
        state.leases.insert(
            id,
            Lease {
                ttl,
                expires: Instant::now() + ttl,
            },
        );
        Ok(id)
    }

    async fn create_if_absent(
        &self,
        key: &str,
        value: &str,
        lease: LeaseId,
    ) -> LockResult<CreateOutcome> {
        let delay = self.state().create_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        state.check_reachable()?;
        state.purge();
        if let Some((holder, lease)) = state.keys.get(key) {
            return Ok(CreateOutcome::Held {
                holder: holder.clone(),
                lease: *lease,
            });
        }
        if !state.leases.contains_key(&lease) {
            return Err(LockError::backend(format!("lease {lease} not found")));
        }
        state
            .keys
            .insert(key.to_string(), (value.to_string(), lease));
        Ok(CreateOutcome::Created)
    }

    async fn keep_alive(&self, lease: LeaseId) -> LockResult<Option<Duration>> {
        let hanging = self.state().keep_alive_hanging;
        if hanging {
            std::future::pending::<()>().await;
        }
        let mut state = self.state();
        state.check_reachable()?;
        if state.keep_alive_failing {
            return Err(LockError::connection("keep-alive failed"));
        }
        state.purge();
        let now = Instant::now();
        Ok(state.leases.get_mut(&lease).map(|lease| {
            lease.expires = now + lease.ttl;
            lease.ttl
        }))
    }

    async fn revoke(&self, lease: LeaseId) -> LockResult<()> {
        let mut state = self.state();
        state.check_reachable()?;
        state.remove_lease(lease);
        state.revoked += 1;
        Ok(())
    }
}
