//! The contract every locking backend satisfies.

use std::future::Future;

use crate::cancel::Cancellation;
use crate::error::LockResult;
use crate::event::LockEvents;

/// A distributed lock that reports acquisition edges for one run.
///
/// Exactly one instance exists per process run. It owns its backend client
/// for its whole lifetime; [`close`](LockingSystem::close) releases it.
///
/// # Example
///
/// ```rust,ignore
/// let (events, mut stream) = lock_events();
/// let run = system.run(Cancellation::new(), events);
/// tokio::pin!(run);
/// loop {
///     tokio::select! {
///         result = &mut run => break result?,
///         Some(event) = stream.recv() => match event {
///             LockEvent::Acquired => start_job(),
///             LockEvent::Lost => stop_job().await,
///         },
///     }
/// }
/// system.close().await?;
/// ```
pub trait LockingSystem: Send + Sync {
    /// Short backend name, used in logs.
    fn backend(&self) -> &'static str;

    /// Runs the coordination protocol until it terminates.
    ///
    /// Reports every acquisition through `events`, and reports its end
    /// before starting another. Returns once `cancel` fires or
    /// [`stop`](LockingSystem::stop) is called, after closing any open
    /// epoch. Returns an error when the backend is unreachable or rejects
    /// our credentials, or when the configuration is malformed.
    fn run(
        &self,
        cancel: Cancellation,
        events: LockEvents,
    ) -> impl Future<Output = LockResult<()>> + Send;

    /// Requests a graceful end to the current `run`.
    ///
    /// Never blocks, may be called from any task, any number of times, and
    /// before `run` starts.
    fn stop(&self);

    /// Releases backend connections once `run` has returned.
    fn close(self) -> impl Future<Output = LockResult<()>> + Send
    where
        Self: Sized;
}
