//! A library for supervising child processes
//!
//! Commands are registered with a [`Registry`](supervisor::Registry), started
//! individually or in bulk, and restarted according to their
//! [`RestartPolicy`](process::RestartPolicy). Output lines and lifecycle
//! events are delivered through hooks, queues, or both.

pub mod backoff;
pub mod config;
pub mod error;
pub mod process;
pub mod supervisor;
pub mod util;

/// Re-export of commonly used types for convenience
pub mod prelude {
    pub use crate::backoff::Backoff;
    pub use crate::config::{CommandConfig, ConfigBuilder, SupervisorConfig, load_config};
    pub use crate::error::{CountErrors, ErrorObserver, LogErrors, PrintErrors, Result, SupervisorError};
    pub use crate::process::{
        CmdState, Command, CommandBuilder, CommandEvents, CommandId, ManagedCommand, OutputStream,
        ProcessError, RestartPolicy,
    };
    pub use crate::supervisor::{ParallelStart, Registry, RegistryBuilder, RunLines, RunOutput, run_capture, run_lines};
    pub use nix::sys::signal::Signal;
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
