//! Supervised process building blocks
//!
//! This module holds everything that describes and observes a single
//! supervised program: the [`Command`] description and its hooks, the
//! runtime record kept per registration ([`ManagedCommand`]), the binding to
//! the live OS process, and the queues used for channel-style delivery of
//! output and lifecycle events.

mod command;
mod error;
mod events;
mod handle;
mod hooks;
mod managed;
mod state;
mod stream;

pub use command::{Command, CommandBuilder, CommandId, QueueConfig, RestartPolicy};
pub use error::{ProcessError, ProcessResult};
pub use events::CommandEvents;
pub use handle::ProcessHandle;
pub use hooks::{CompletedHook, ExitHook, Hooks, LineHook, RestartHook, StateHook};
pub use managed::ManagedCommand;
pub use state::CmdState;
pub use stream::{FilteredLineStream, LineStream, MappedLineStream, OutputStream};

pub(crate) use managed::RunClaim;
pub(crate) use stream::pump_lines;
