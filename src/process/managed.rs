use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::info;

use super::command::{Command, CommandId};
use super::error::ProcessError;
use super::events::{CommandEvents, EventSink};
use super::handle::ProcessHandle;
use super::state::{CmdState, StateCell};
use super::stream::OutputStream;
use crate::error::{ErrorObserver, Result, SupervisorError};

/// A registered command: its description plus runtime state.
///
/// Runtime fields are written by the task running the command's supervision
/// loop; the kill path is the only other writer and it only touches the
/// state, through compare-and-swap. Everyone else reads.
#[derive(Debug)]
pub struct ManagedCommand {
    id: CommandId,
    command: Command,
    signature: String,
    prefix: String,
    state: StateCell,
    restart_count: AtomicU32,
    last_exit_code: AtomicI32,
    last_error: Mutex<Option<Arc<ProcessError>>>,
    process: ProcessHandle,
    sink: EventSink,
    events: Mutex<Option<CommandEvents>>,
    running: AtomicBool,
}

impl ManagedCommand {
    pub(crate) fn new(id: CommandId, command: Command) -> Self {
        let (sink, events) = match command.queues {
            Some(config) => {
                let (sink, events) = EventSink::channels(config);
                (sink, Some(events))
            }
            None => (EventSink::disabled(), None),
        };
        let prefix = match command.label() {
            Some(label) => format!("{}: ", label),
            None => format!("CMD:{}: ", id),
        };

        Self {
            id,
            signature: command.signature(),
            command,
            prefix,
            state: StateCell::new(CmdState::NotStarted),
            restart_count: AtomicU32::new(0),
            last_exit_code: AtomicI32::new(0),
            last_error: Mutex::new(None),
            process: ProcessHandle::new(),
            sink,
            events: Mutex::new(events),
            running: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Canonical deduplication key, fixed for the lifetime of the registration
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Log prefix, `"<label>: "` or `"CMD:<id>: "`
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn state(&self) -> CmdState {
        self.state.load()
    }

    /// Completed spawn attempts in the current run
    pub fn restart_count(&self) -> u32 {
        self.restart_count.load(Ordering::Acquire)
    }

    pub fn last_exit_code(&self) -> i32 {
        self.last_exit_code.load(Ordering::Acquire)
    }

    /// Error of the last spawn attempt, `None` if it exited cleanly
    pub fn last_error(&self) -> Option<Arc<ProcessError>> {
        self.last_error.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn process(&self) -> &ProcessHandle {
        &self.process
    }

    /// Whether a supervision loop currently owns this command
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn take_events(&self) -> Result<CommandEvents> {
        self.events
            .lock()
            .map_err(|_| SupervisorError::LockPoisoned)?
            .take()
            .ok_or(SupervisorError::EventsUnavailable(self.id))
    }

    /// Become the single writer of the runtime fields
    pub(crate) fn claim(self: &Arc<Self>) -> Result<RunClaim> {
        let state = self.state();
        if state != CmdState::NotStarted {
            return Err(SupervisorError::InvalidState { id: self.id, state });
        }
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(SupervisorError::InvalidState { id: self.id, state });
        }
        Ok(RunClaim {
            managed: Arc::clone(self),
        })
    }

    pub(crate) fn set_outcome(&self, exit_code: i32, error: Option<Arc<ProcessError>>) {
        self.last_exit_code.store(exit_code, Ordering::Release);
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = error;
    }

    pub(crate) fn bump_restart_count(&self) -> u32 {
        self.restart_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn reset_restart_count(&self) {
        self.restart_count.store(0, Ordering::Release);
    }

    /// Set the state and notify observers; a no-op if nothing changes
    pub(crate) fn transition(&self, new: CmdState) {
        let old = self.state.swap(new);
        if old != new {
            self.notify_state(old, new);
        }
    }

    /// Set the state only if it is still `expected`
    pub(crate) fn transition_from(&self, expected: CmdState, new: CmdState) -> bool {
        if self.state.replace_if(expected, new) {
            self.notify_state(expected, new);
            true
        } else {
            false
        }
    }

    /// Mark the command killed, from any state but not-started.
    ///
    /// Returns the state it was in before.
    pub(crate) fn mark_killed(&self) -> Result<CmdState> {
        loop {
            let current = self.state();
            match current {
                CmdState::NotStarted => {
                    return Err(SupervisorError::InvalidState {
                        id: self.id,
                        state: current,
                    });
                }
                CmdState::Killed => return Ok(current),
                _ => {
                    if self.transition_from(current, CmdState::Killed) {
                        return Ok(current);
                    }
                }
            }
        }
    }

    fn notify_state(&self, old: CmdState, new: CmdState) {
        if let Some(hook) = &self.command.hooks.on_state_changed {
            hook(self, old, new);
        }
        self.sink.state(new);
    }

    /// Hand one output line to the hook, the log and the queue
    pub(crate) async fn publish_line(
        &self,
        stream: OutputStream,
        line: &str,
        observer: &dyn ErrorObserver,
    ) {
        let (hook, hidden) = match stream {
            OutputStream::Stdout => (&self.command.hooks.on_stdout, self.command.hide_stdout),
            OutputStream::Stderr => (&self.command.hooks.on_stderr, self.command.hide_stderr),
        };
        if let Some(hook) = hook {
            if let Err(e) = hook(self, line) {
                let context = format!("{}error on {} hook: {}", self.prefix, stream, line);
                observer.observe(&context, &*e);
            }
        }
        if !hidden {
            info!("{}{}", self.prefix, line);
        }
        self.sink.line(stream, line.to_string()).await;
    }

    pub(crate) fn publish_completed(&self, elapsed: Duration) {
        if let Some(hook) = &self.command.hooks.on_process_completed {
            hook(self, elapsed);
        }
        self.sink.completed(elapsed);
    }

    pub(crate) fn publish_exit(&self) {
        if let Some(hook) = &self.command.hooks.on_exit {
            hook(self);
        }
        self.sink.exit();
    }

    /// Delay before the next spawn attempt
    pub(crate) fn next_restart_delay(&self) -> Duration {
        match &self.command.hooks.on_restart {
            Some(hook) => hook(self),
            None => self.command.restart_delay,
        }
    }
}

/// Proof that the holder runs the command's supervision loop.
///
/// Released on drop, so a cancelled loop frees the command as well.
pub(crate) struct RunClaim {
    managed: Arc<ManagedCommand>,
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        self.managed.process.release();
        self.managed.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn test_prefix_uses_label() {
        let plain = ManagedCommand::new(CommandId(3), Command::new("true", Vec::<String>::new()));
        assert_eq!(plain.prefix(), "CMD:3: ");

        let labelled = ManagedCommand::new(CommandId(3), Command::builder("true").label("web").build());
        assert_eq!(labelled.prefix(), "web: ");
    }

    #[test]
    fn test_transition_notifies_once_per_change() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let command = Command::builder("true")
            .on_state_changed(move |_, old, new| sink.lock().unwrap().push((old, new)))
            .build();
        let managed = ManagedCommand::new(CommandId(0), command);

        managed.transition(CmdState::Started);
        managed.transition(CmdState::Started);
        assert!(!managed.transition_from(CmdState::NotStarted, CmdState::Exited));
        assert!(managed.transition_from(CmdState::Started, CmdState::Exited));

        assert_eq!(
            seen.lock().unwrap().as_slice(),
            [
                (CmdState::NotStarted, CmdState::Started),
                (CmdState::Started, CmdState::Exited),
            ]
        );
    }

    #[test]
    fn test_mark_killed() {
        let managed = ManagedCommand::new(CommandId(0), Command::new("true", Vec::<String>::new()));
        assert!(matches!(
            managed.mark_killed(),
            Err(SupervisorError::InvalidState { .. })
        ));

        managed.transition(CmdState::Crashed);
        assert_eq!(managed.mark_killed().unwrap(), CmdState::Crashed);
        assert_eq!(managed.state(), CmdState::Killed);
        assert_eq!(managed.mark_killed().unwrap(), CmdState::Killed);
    }

    #[test]
    fn test_claim_is_exclusive() {
        let managed = Arc::new(ManagedCommand::new(
            CommandId(0),
            Command::new("true", Vec::<String>::new()),
        ));
        let claim = managed.claim().unwrap();
        assert!(managed.is_running());
        assert!(managed.claim().is_err());
        drop(claim);
        assert!(!managed.is_running());
        assert!(managed.claim().is_ok());
    }

    #[test]
    fn test_events_taken_once() {
        let managed = ManagedCommand::new(CommandId(0), Command::builder("true").queues(1, 1).build());
        assert!(managed.take_events().is_ok());
        assert!(matches!(
            managed.take_events(),
            Err(SupervisorError::EventsUnavailable(_))
        ));

        let without = ManagedCommand::new(CommandId(1), Command::new("true", Vec::<String>::new()));
        assert!(without.take_events().is_err());
    }

    #[test]
    fn test_restart_delay_prefers_hook() {
        let fixed = ManagedCommand::new(
            CommandId(0),
            Command::builder("true").restart_delay(Duration::from_millis(30)).build(),
        );
        assert_eq!(fixed.next_restart_delay(), Duration::from_millis(30));

        let hooked = ManagedCommand::new(
            CommandId(0),
            Command::builder("true")
                .restart_delay(Duration::from_millis(30))
                .on_restart(|cmd| Duration::from_millis(10 * u64::from(cmd.restart_count())))
                .build(),
        );
        hooked.bump_restart_count();
        hooked.bump_restart_count();
        assert_eq!(hooked.next_restart_delay(), Duration::from_millis(20));
    }
}
