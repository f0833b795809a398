//! Process supervision for the command protected by the lock.
//!
//! [`CommandRunner`] starts the command at most once, forwards interrupt
//! and termination signals to it, reports its exit, and stops it with an
//! escalating interrupt-then-kill sequence.

pub mod error;
pub mod exit;
pub mod runner;
mod signals;

pub use error::{ProcessError, ProcessResult};
pub use exit::ProcessExit;
pub use runner::{CommandRunner, RunnerState};
