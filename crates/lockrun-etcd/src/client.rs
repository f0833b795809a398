//! The key-value operations the lock protocol needs from a backend.

use std::future::Future;
use std::time::Duration;

use lockrun_core::error::LockResult;

/// Backend-issued lease identifier.
pub type LeaseId = i64;

/// Result of the conditional create transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The key did not exist and now holds our identity.
    Created,
    /// The key already exists.
    Held {
        /// Identity stored by the current holder.
        holder: String,
        /// Lease the existing record is bound to.
        lease: LeaseId,
    },
}

/// A transactional key-value store with leases.
///
/// Implementations must be safe to call from several tasks at once.
pub trait KvClient: Send + Sync {
    /// Grants a lease that expires after `ttl` unless kept alive.
    fn grant(&self, ttl: Duration) -> impl Future<Output = LockResult<LeaseId>> + Send;

    /// Atomically creates `key` = `value` bound to `lease` if the key has
    /// no creation record; otherwise reads the existing record.
    fn create_if_absent(
        &self,
        key: &str,
        value: &str,
        lease: LeaseId,
    ) -> impl Future<Output = LockResult<CreateOutcome>> + Send;

    /// Renews `lease`, returning its new TTL, or `None` if it no longer
    /// exists (expired or revoked).
    fn keep_alive(
        &self,
        lease: LeaseId,
    ) -> impl Future<Output = LockResult<Option<Duration>>> + Send;

    /// Revokes `lease`, deleting every key bound to it.
    fn revoke(&self, lease: LeaseId) -> impl Future<Output = LockResult<()>> + Send;
}
