//! Convenience prelude for locking system types.

pub use crate::cancel::Cancellation;
pub use crate::config::LockConfig;
pub use crate::error::{LockError, LockResult};
pub use crate::event::{LockEvent, LockEventStream, LockEvents, lock_events};
pub use crate::identity::Identity;
pub use crate::traits::LockingSystem;
