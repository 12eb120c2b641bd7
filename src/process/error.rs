use std::io;
use std::process::ExitStatus;

use nix::sys::signal::Signal;
use thiserror::Error;

/// Result type for process operations
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;

/// Errors that can occur while running a supervised process
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn process: {0}")]
    Spawn(#[source] io::Error),

    #[error("Failed to acquire {0} pipe")]
    Pipe(&'static str),

    #[error("Process exited with non-zero status: {0}")]
    NonZeroExit(ExitStatus),

    #[error("Failed to wait for process: {0}")]
    Wait(#[source] io::Error),

    #[error("Failed to deliver {signal} to process: {source}")]
    Signal {
        signal: Signal,
        #[source]
        source: nix::Error,
    },

    #[error("No live process bound to this command")]
    NotRunning,

    #[error("Failed to terminate process: {0}")]
    Terminate(String),
}

impl ProcessError {
    /// Exit code carried by the error, if any.
    ///
    /// A process ended by a signal has no code and reports `-1`.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessError::NonZeroExit(status) => Some(status.code().unwrap_or(-1)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn test_exit_code_from_status() {
        let err = ProcessError::NonZeroExit(ExitStatus::from_raw(3 << 8));
        assert_eq!(err.exit_code(), Some(3));
    }

    #[test]
    fn test_signalled_exit_has_negative_code() {
        // raw wait status 9 = terminated by SIGKILL
        let err = ProcessError::NonZeroExit(ExitStatus::from_raw(9));
        assert_eq!(err.exit_code(), Some(-1));
    }

    #[test]
    fn test_spawn_error_has_no_code() {
        let err = ProcessError::Spawn(io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(err.exit_code(), None);
    }
}
