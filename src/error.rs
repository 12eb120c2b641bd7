// src/error.rs
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::error;
use thiserror::Error;

use crate::process::{CmdState, CommandId, ProcessError};

/// Result type for supervisor operations
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Custom Error type for the procwarden library
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Invalid command id {id}, registry holds {len} commands")]
    OutOfRange { id: CommandId, len: usize },

    #[error("Command {id} is in state {state}")]
    InvalidState { id: CommandId, state: CmdState },

    #[error("Process error: {0}")]
    Process(#[source] Arc<ProcessError>),

    #[error("Event queues of command {0} are disabled or already taken")]
    EventsUnavailable(CommandId),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Registry lock poisoned")]
    LockPoisoned,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Supervision task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<ProcessError> for SupervisorError {
    fn from(err: ProcessError) -> Self {
        SupervisorError::Process(Arc::new(err))
    }
}

/// Seam through which every non-fatal failure is surfaced.
///
/// The registry owns one observer and hands it to each supervision run, so
/// hook failures, stream read failures and signal failures all end up in the
/// same place. Fatal failures are additionally returned to the caller.
pub trait ErrorObserver: Send + Sync + 'static {
    /// Report `err`, which happened while doing `context`
    fn observe(&self, context: &str, err: &(dyn StdError + 'static));
}

impl<F> ErrorObserver for F
where
    F: Fn(&str, &(dyn StdError + 'static)) + Send + Sync + 'static,
{
    fn observe(&self, context: &str, err: &(dyn StdError + 'static)) {
        self(context, err)
    }
}

/// Log-and-continue through the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrors;

impl ErrorObserver for LogErrors {
    fn observe(&self, context: &str, err: &(dyn StdError + 'static)) {
        error!("{}: {}", context, err);
    }
}

/// Print-and-continue to standard error
#[derive(Debug, Default, Clone, Copy)]
pub struct PrintErrors;

impl ErrorObserver for PrintErrors {
    fn observe(&self, context: &str, err: &(dyn StdError + 'static)) {
        eprintln!("{}: {}", context, err);
    }
}

/// Silently tally errors
#[derive(Debug, Default)]
pub struct CountErrors {
    count: AtomicUsize,
}

impl CountErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of errors observed so far
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

impl ErrorObserver for CountErrors {
    fn observe(&self, _context: &str, _err: &(dyn StdError + 'static)) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_count_errors() {
        let counter = CountErrors::new();
        let err = io::Error::other("boom");
        counter.observe("first", &err);
        counter.observe("second", &err);
        assert_eq!(counter.count(), 2);
    }

    #[test]
    fn test_closure_observer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer = move |context: &str, err: &(dyn StdError + 'static)| {
            sink.lock().unwrap().push(format!("{}: {}", context, err));
        };
        observer.observe("reading stdout", &io::Error::other("closed"));
        assert_eq!(seen.lock().unwrap().as_slice(), ["reading stdout: closed"]);
    }

    #[test]
    fn test_process_error_converts() {
        let err: SupervisorError = ProcessError::NotRunning.into();
        assert!(matches!(err, SupervisorError::Process(_)));
        assert!(err.to_string().contains("No live process"));
    }
}
