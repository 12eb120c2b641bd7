//! Callback hooks fired by the supervision engine
//!
//! Every hook receives the [`ManagedCommand`] it belongs to, so it can read
//! the runtime fields (state, restart counter, last error) without holding a
//! reference to the registry.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::managed::ManagedCommand;
use super::state::CmdState;

/// One line read from stdout or stderr. Errors are reported, never fatal.
pub type LineHook = Arc<dyn Fn(&ManagedCommand, &str) -> anyhow::Result<()> + Send + Sync>;

/// Produces the delay before the next restart, overriding the configured one
pub type RestartHook = Arc<dyn Fn(&ManagedCommand) -> Duration + Send + Sync>;

/// Fired once per spawn attempt with its wall-clock duration
pub type CompletedHook = Arc<dyn Fn(&ManagedCommand, Duration) + Send + Sync>;

/// Fired once when the command stops for good
pub type ExitHook = Arc<dyn Fn(&ManagedCommand) + Send + Sync>;

/// Fired on every state transition with the old and new state
pub type StateHook = Arc<dyn Fn(&ManagedCommand, CmdState, CmdState) + Send + Sync>;

/// The optional hooks of a command; any subset may be set
#[derive(Clone, Default)]
pub struct Hooks {
    pub on_stdout: Option<LineHook>,
    pub on_stderr: Option<LineHook>,
    pub on_restart: Option<RestartHook>,
    pub on_process_completed: Option<CompletedHook>,
    pub on_exit: Option<ExitHook>,
    pub on_state_changed: Option<StateHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_stdout", &self.on_stdout.is_some())
            .field("on_stderr", &self.on_stderr.is_some())
            .field("on_restart", &self.on_restart.is_some())
            .field("on_process_completed", &self.on_process_completed.is_some())
            .field("on_exit", &self.on_exit.is_some())
            .field("on_state_changed", &self.on_state_changed.is_some())
            .finish()
    }
}
