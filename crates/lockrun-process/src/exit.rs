//! Terminal status of the supervised process.

use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

/// How the supervised process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exited normally with a status code.
    Exited(i32),
    /// Terminated by a signal.
    Signaled(i32),
    /// Waiting on the process failed; its fate is unknown.
    WaitFailed(String),
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        matches!(self, ProcessExit::Exited(0))
    }
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => ProcessExit::Exited(code),
            (None, Some(signal)) => ProcessExit::Signaled(signal),
            (None, None) => ProcessExit::WaitFailed(format!("unrecognised status {status}")),
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessExit::Exited(code) => write!(f, "exited with status {code}"),
            ProcessExit::Signaled(signal) => write!(f, "terminated by signal {signal}"),
            ProcessExit::WaitFailed(reason) => write!(f, "could not be waited on: {reason}"),
        }
    }
}
