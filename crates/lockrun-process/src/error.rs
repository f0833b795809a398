//! Error types for process supervision.

use thiserror::Error;

/// Errors returned when starting the supervised command.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// No program was given.
    #[error("no command to run")]
    EmptyCommand,

    /// The runner already started its process once.
    #[error("command was already started")]
    AlreadyStarted,

    /// The program could not be started (missing binary, permissions).
    #[error("error running command '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Signal handlers could not be installed.
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),
}

/// Result type for process supervision.
pub type ProcessResult<T> = Result<T, ProcessError>;
