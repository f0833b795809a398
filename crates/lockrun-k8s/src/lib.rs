//! Kubernetes coordinator backend for lockrun.
//!
//! Leadership over a `coordination.k8s.io/v1` Lease object stands in for
//! the lock. [`election`] runs the lease election and reports two edges,
//! started and stopped leading; [`lock`] maps those edges onto lock events.

pub mod builder;
pub mod election;
pub mod lock;

pub use builder::K8sLockingSystemBuilder;
pub use election::{ElectionConfig, Leadership, LeaderElector};
pub use lock::K8sLockingSystem;
