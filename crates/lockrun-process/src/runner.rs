//! The command runner.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{ProcessError, ProcessResult};
use crate::exit::ProcessExit;
use crate::signals::{Signal, SignalForwarder, deliver};

/// Lifecycle of a [`CommandRunner`]. Transitions only move forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerState {
    NotStarted,
    Running,
    /// An interrupt was sent and the process has not been seen exiting.
    Stopping,
    Exited(ProcessExit),
}

/// Runs one command, once, with inherited standard streams.
///
/// The child handle is owned by a wait task. The runner only talks to it
/// through two channels: signal requests going in, and a single-slot exit
/// notification coming out. The slot lock is never held while waiting on
/// the process, so state queries answer during a stop.
pub struct CommandRunner {
    program: String,
    args: Vec<String>,
    grace_period: Duration,
    slot: Mutex<Slot>,
}

enum Slot {
    NotStarted,
    Started(Supervised),
}

struct Supervised {
    pid: Option<u32>,
    signals: mpsc::UnboundedSender<Signal>,
    /// Written once by the wait task.
    exited: watch::Receiver<Option<ProcessExit>>,
    stopping: bool,
}

impl Supervised {
    /// Returns the exit if the wait task already reported it.
    fn exit(&self) -> Option<ProcessExit> {
        let closed = self.exited.has_changed().is_err();
        match self.exited.borrow().clone() {
            Some(exit) => Some(exit),
            None if closed => Some(wait_task_vanished()),
            None => None,
        }
    }
}

fn wait_task_vanished() -> ProcessExit {
    ProcessExit::WaitFailed("wait task ended without reporting".to_string())
}

impl CommandRunner {
    /// Creates a runner for `command` (program followed by its arguments).
    pub fn new(command: Vec<String>, grace_period: Duration) -> ProcessResult<Self> {
        let mut command = command.into_iter();
        let program = command.next().ok_or(ProcessError::EmptyCommand)?;
        Ok(Self {
            program,
            args: command.collect(),
            grace_period,
            slot: Mutex::new(Slot::NotStarted),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Starts the command and its monitors.
    ///
    /// `on_exit` runs on the wait task once the process ends, whatever the
    /// reason. A start failure is returned immediately and leaves no task
    /// behind.
    #[instrument(skip(self, on_exit), fields(program = %self.program))]
    pub async fn start<F>(&self, on_exit: F) -> ProcessResult<()>
    where
        F: FnOnce(ProcessExit) + Send + 'static,
    {
        let mut slot = self.slot.lock().await;
        if matches!(*slot, Slot::Started(_)) {
            return Err(ProcessError::AlreadyStarted);
        }

        let forwarder = SignalForwarder::install()?;
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        let pid = child.id();
        info!(pid, args = ?self.args, "command started");

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        tokio::spawn(forwarder.forward(signal_tx.clone()));
        tokio::spawn(wait_for_exit(child, signal_rx, exit_tx, on_exit));

        *slot = Slot::Started(Supervised {
            pid,
            signals: signal_tx,
            exited: exit_rx,
            stopping: false,
        });
        Ok(())
    }

    /// Stops the command: interrupt, then kill after the grace period.
    ///
    /// Returns immediately if the command never started or already exited.
    /// After escalating to a kill it returns without waiting; the exit is
    /// still reported to the `on_exit` callback given to
    /// [`start`](Self::start).
    #[instrument(skip(self), fields(program = %self.program))]
    pub async fn stop(&self) {
        let (pid, signals, mut exited) = {
            let mut slot = self.slot.lock().await;
            let Slot::Started(process) = &mut *slot else {
                debug!("stop requested but command never started");
                return;
            };
            if let Some(exit) = process.exit() {
                debug!(%exit, "stop requested but command already ended");
                return;
            }
            if process.stopping {
                debug!("command is already being stopped");
                return;
            }
            process.stopping = true;
            (process.pid, process.signals.clone(), process.exited.clone())
        };

        info!(pid, "sending interrupt to command");
        let _ = signals.send(Signal::Interrupt);

        tokio::select! {
            exit = exited.wait_for(Option::is_some) => {
                let exit = exit
                    .ok()
                    .and_then(|exit| (*exit).clone())
                    .unwrap_or_else(wait_task_vanished);
                match &exit {
                    ProcessExit::Exited(code) => info!(code, "process exited"),
                    ProcessExit::Signaled(signal) => info!(signal, "process was terminated by a signal"),
                    ProcessExit::WaitFailed(reason) => warn!(%reason, "process state unknown"),
                }
            }
            _ = tokio::time::sleep(self.grace_period) => {
                warn!(
                    pid,
                    grace_period = ?self.grace_period,
                    "grace period elapsed, killing command"
                );
                let _ = signals.send(Signal::Kill);
            }
        }
    }

    /// Returns the current lifecycle state.
    pub async fn state(&self) -> RunnerState {
        let slot = self.slot.lock().await;
        match &*slot {
            Slot::NotStarted => RunnerState::NotStarted,
            Slot::Started(process) => match process.exit() {
                Some(exit) => RunnerState::Exited(exit),
                None if process.stopping => RunnerState::Stopping,
                None => RunnerState::Running,
            },
        }
    }
}

/// Owns the child until it exits, delivering requested signals meanwhile.
async fn wait_for_exit<F>(
    mut child: Child,
    mut signals: mpsc::UnboundedReceiver<Signal>,
    exited: watch::Sender<Option<ProcessExit>>,
    on_exit: F,
) where
    F: FnOnce(ProcessExit),
{
    let pid = child.id();
    let exit = loop {
        tokio::select! {
            status = child.wait() => {
                break match status {
                    Ok(status) => ProcessExit::from(status),
                    Err(e) => {
                        error!(pid, error = %e, "error waiting for command");
                        ProcessExit::WaitFailed(e.to_string())
                    }
                };
            }
            Some(signal) = signals.recv() => deliver(&mut child, signal),
        }
    };
    info!(pid, %exit, "command exited");

    exited.send_replace(Some(exit.clone()));
    drop(signals);
    on_exit(exit);
}
