//! Signal delivery to, and forwarding towards, the supervised process.

use tokio::process::Child;
use tokio::signal::unix::{Signal as SignalStream, SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{ProcessError, ProcessResult};

/// A signal the wait task delivers to the child on request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    Interrupt,
    Kill,
}

/// Delivers `signal` to `child`.
///
/// A child that was already reaped has no pid any more; the signal is then
/// dropped instead of hitting a recycled pid.
pub(crate) fn deliver(child: &mut Child, signal: Signal) {
    let Some(pid) = child.id() else {
        return;
    };
    match signal {
        Signal::Interrupt => {
            // SAFETY: kill(2) has no memory-safety preconditions; `pid`
            // belongs to our unreaped child.
            let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
            if result != 0 {
                warn!(
                    pid,
                    error = %std::io::Error::last_os_error(),
                    "failed to send interrupt to command"
                );
            }
        }
        Signal::Kill => {
            if let Err(e) = child.start_kill() {
                warn!(pid, error = %e, "failed to kill command");
            }
        }
    }
}

/// Listens for interrupt and termination signals sent to this process.
pub(crate) struct SignalForwarder {
    interrupt: SignalStream,
    terminate: SignalStream,
}

impl SignalForwarder {
    /// Installs the handlers.
    ///
    /// Done before the child is spawned so a failure leaves nothing running.
    pub(crate) fn install() -> ProcessResult<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).map_err(ProcessError::Signals)?,
            terminate: signal(SignalKind::terminate()).map_err(ProcessError::Signals)?,
        })
    }

    /// Forwards every received signal to the child as an interrupt until
    /// the wait task stops accepting requests.
    pub(crate) async fn forward(mut self, requests: mpsc::UnboundedSender<Signal>) {
        loop {
            let name = tokio::select! {
                _ = self.interrupt.recv() => "SIGINT",
                _ = self.terminate.recv() => "SIGTERM",
                _ = requests.closed() => break,
            };
            info!(signal = name, "received signal, forwarding interrupt to command");
            if requests.send(Signal::Interrupt).is_err() {
                break;
            }
        }
    }
}
