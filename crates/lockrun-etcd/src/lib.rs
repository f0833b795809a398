//! Key-value transaction backend for lockrun.
//!
//! The lock is a single key whose value is the holder's identity, bound to a
//! backend lease. Whoever creates the key holds the lock; the lease TTL
//! frees it if the holder dies.

pub mod builder;
pub mod client;
pub mod etcd;
pub mod lock;

pub use builder::EtcdLockingSystemBuilder;
pub use client::{CreateOutcome, KvClient, LeaseId};
pub use etcd::EtcdClient;
pub use lock::{KvLockState, KvLockingSystem};
