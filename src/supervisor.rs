//! Wires lock events to the command runner.

use anyhow::{Context, Result};
use lockrun::{
    Cancellation, CommandRunner, LockEvent, LockingSystem, ProcessExit, RunnerState, lock_events,
};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Runs `system` to completion, starting `runner` while the lock is held.
///
/// The command runs at most once. Losing the lock stops the command and
/// ends the run; the command ending on its own ends the run too. Returns the
/// command's exit status if it was observed, or an error for fatal backend
/// or start failures.
pub async fn supervise<L: LockingSystem>(
    system: L,
    runner: CommandRunner,
) -> Result<Option<ProcessExit>> {
    let backend = system.backend();
    let (events, mut stream) = lock_events();
    let (exit_tx, mut exits) = mpsc::channel(1);
    let mut exit_tx = Some(exit_tx);
    let mut exit = None;
    let mut failure = None;
    // Set once the run is winding down; a late acquisition must not start
    // the command.
    let mut stop_requested = false;

    let result = {
        let run = system.run(Cancellation::new(), events);
        tokio::pin!(run);
        let shutdown = shutdown_requested();
        tokio::pin!(shutdown);
        let mut shutdown_pending = true;

        loop {
            tokio::select! {
                result = &mut run => break result,
                Some(event) = stream.recv() => match event {
                    LockEvent::Acquired => {
                        if stop_requested {
                            info!("lock acquired while stopping, not starting command");
                            continue;
                        }
                        let Some(exit_tx) = exit_tx.take() else {
                            warn!("lock acquired again but the command already ran, stopping");
                            system.stop();
                            continue;
                        };
                        info!(program = runner.program(), "lock acquired, starting command");
                        let started = runner
                            .start(move |status| {
                                let _ = exit_tx.try_send(status);
                            })
                            .await;
                        if let Err(e) = started {
                            error!(error = %e, "failed to start command");
                            failure = Some(anyhow::Error::new(e));
                            stop_requested = true;
                            system.stop();
                        }
                    }
                    LockEvent::Lost => {
                        warn!("lock lost, stopping command");
                        stop_requested = true;
                        runner.stop().await;
                        system.stop();
                    }
                },
                Some(status) = exits.recv() => {
                    info!(%status, "command ended, releasing lock");
                    exit = Some(status);
                    stop_requested = true;
                    system.stop();
                }
                requested = &mut shutdown, if shutdown_pending => {
                    shutdown_pending = false;
                    match requested {
                        // Once started, the command receives the signal
                        // itself and its exit ends the run.
                        Ok(()) if exit_tx.is_some() => {
                            info!("shutdown requested before the command started");
                            stop_requested = true;
                            system.stop();
                        }
                        Ok(()) => {}
                        Err(e) => warn!(error = %e, "can't listen for shutdown signals"),
                    }
                }
            }
        }
    };

    runner.stop().await;
    // The runner may have collected the exit before the callback fired.
    if exit.is_none()
        && let RunnerState::Exited(status) = runner.state().await
    {
        exit = Some(status);
    }
    if let Err(e) = system.close().await {
        warn!(backend, error = %e, "error closing locking system");
    }

    if let Some(e) = failure {
        return Err(e);
    }
    result.with_context(|| format!("{backend} locking system failed"))?;
    Ok(exit)
}

/// Completes on the first interrupt or termination signal.
async fn shutdown_requested() -> std::io::Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
    Ok(())
}
