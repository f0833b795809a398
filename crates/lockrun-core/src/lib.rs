//! Core traits and types for running a command under a distributed lock.

pub mod cancel;
pub mod config;
pub mod error;
pub mod event;
pub mod identity;
pub mod prelude;
pub mod traits;

pub use error::{LockError, LockResult};
pub use prelude::*;
