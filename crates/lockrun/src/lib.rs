//! Run a command only while holding a distributed lock.
//!
//! A [`LockingSystem`] campaigns for a lock and reports acquisition edges;
//! a [`CommandRunner`] starts the command when the lock is acquired and
//! interrupts it, then kills it after a grace period, when the lock is lost.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use lockrun::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LockConfig::new(Identity::process().clone())
//!         .lease_interval(Duration::from_secs(10))
//!         .validate()?;
//!
//!     let system = EtcdLockingSystemBuilder::new()
//!         .endpoints(&["127.0.0.1:2379"])
//!         .key("nightly-backup")
//!         .build(config)
//!         .await?;
//!
//!     let (events, mut stream) = lock_events();
//!     let run = system.run(Cancellation::new(), events);
//!     tokio::pin!(run);
//!     loop {
//!         tokio::select! {
//!             result = &mut run => break result?,
//!             Some(event) = stream.recv() => println!("{event:?}"),
//!         }
//!     }
//!     system.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! ## Key-value transactions (etcd)
//!
//! The lock is a key bound to a lease, created with a compare-and-set
//! transaction. The lease TTL frees it if the holder dies.
//!
//! ## Kubernetes coordinator
//!
//! Leader election over a `coordination.k8s.io/v1` Lease object. The Lease
//! is cleared when the holder stops gracefully.
//!
//! ## Object store
//!
//! Configuration only; running it reports [`LockError::Unsupported`].
//!
//! # Crate Organization
//!
//! This is a meta-crate that re-exports types from:
//! - `lockrun-core`: the locking system contract, events and configuration
//! - `lockrun-process`: the command runner
//! - `lockrun-etcd`: key-value transaction backend
//! - `lockrun-k8s`: Kubernetes Lease backend
//! - `lockrun-s3`: object store backend
//!
//! For fine-grained control, you can depend on individual crates instead.

pub use lockrun_core::*;

pub use lockrun_process::{CommandRunner, ProcessError, ProcessExit, ProcessResult, RunnerState};

pub use lockrun_etcd::{EtcdClient, EtcdLockingSystemBuilder, KvClient, KvLockState, KvLockingSystem};

pub use lockrun_k8s::{K8sLockingSystem, K8sLockingSystemBuilder};

pub use lockrun_s3::{ObjectStoreLockingSystem, ObjectStoreLockingSystemBuilder};
