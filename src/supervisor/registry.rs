use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::{debug, info, warn};
use nix::sys::signal::Signal;

use super::engine;
use super::parallel::ParallelStart;
use super::signals;
use crate::error::{ErrorObserver, LogErrors, Result, SupervisorError};
use crate::process::{CmdState, Command, CommandEvents, CommandId, ManagedCommand, ProcessError};

/// Shape of the registry: slots indexed by id plus the deduplication index
#[derive(Default)]
struct Slots {
    commands: Vec<Arc<ManagedCommand>>,
    by_signature: HashMap<String, CommandId>,
}

/// Owns every registered command and coordinates starting and stopping them.
///
/// The lock only guards the shape of the collection. It is never held while a
/// command runs, so long-running commands do not serialise each other.
pub struct Registry {
    slots: RwLock<Slots>,
    observer: Arc<dyn ErrorObserver>,
}

/// Builder for registries
pub struct RegistryBuilder {
    observer: Arc<dyn ErrorObserver>,
    cleanup_on_signal: bool,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            observer: Arc::new(LogErrors),
            cleanup_on_signal: false,
        }
    }

    /// Where non-fatal errors are reported; logs them by default
    pub fn error_observer(mut self, observer: Arc<dyn ErrorObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Kill every command and exit the process on SIGINT or SIGTERM.
    ///
    /// Only the first registry built with this in a process gets the handler.
    /// Building requires a running tokio runtime when enabled.
    pub fn cleanup_on_signal(mut self, enabled: bool) -> Self {
        self.cleanup_on_signal = enabled;
        self
    }

    pub fn build(self) -> Result<Arc<Registry>> {
        let registry = Arc::new(Registry {
            slots: RwLock::new(Slots::default()),
            observer: self.observer,
        });
        if self.cleanup_on_signal {
            signals::install_cleanup(&registry)?;
        }
        Ok(registry)
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Registry that logs errors and installs no signal handler.
    ///
    /// Call [`Registry::cleanup`] before exiting or live children may be left behind.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slots: RwLock::new(Slots::default()),
            observer: Arc::new(LogErrors),
        })
    }

    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn observer(&self) -> &Arc<dyn ErrorObserver> {
        &self.observer
    }

    /// Add a command; it is not started until [`Registry::start`] is called.
    ///
    /// A command with the same signature as an earlier one takes over its slot
    /// and id, with fresh runtime state. A run still in progress on the
    /// replaced entry keeps going but can no longer be reached through the id,
    /// so neither [`Registry::kill`] nor [`Registry::cleanup`] will stop its
    /// process. Kill the old command before replacing it.
    pub fn register(&self, command: Command) -> Result<CommandId> {
        self.register_managed(command).map(|managed| managed.id())
    }

    pub(crate) fn register_managed(&self, command: Command) -> Result<Arc<ManagedCommand>> {
        let mut slots = self.slots.write().map_err(|_| SupervisorError::LockPoisoned)?;
        let signature = command.signature();

        let managed = match slots.by_signature.get(&signature).copied() {
            Some(id) => {
                let replaced = &slots.commands[id.index()];
                if replaced.is_running() {
                    warn!(
                        "{}replacing a running command, pid {:?} is no longer supervised through {}",
                        replaced.prefix(),
                        replaced.process().pid(),
                        id
                    );
                } else {
                    debug!("Replacing command {} ({})", id, signature);
                }
                let managed = Arc::new(ManagedCommand::new(id, command));
                slots.commands[id.index()] = Arc::clone(&managed);
                managed
            }
            None => {
                let id = CommandId(slots.commands.len());
                debug!("Registering command {} ({})", id, signature);
                let managed = Arc::new(ManagedCommand::new(id, command));
                slots.commands.push(Arc::clone(&managed));
                slots.by_signature.insert(signature, id);
                managed
            }
        };

        Ok(managed)
    }

    /// The registered command behind `id`
    pub fn get(&self, id: CommandId) -> Result<Arc<ManagedCommand>> {
        let slots = self.slots.read().map_err(|_| SupervisorError::LockPoisoned)?;
        slots
            .commands
            .get(id.index())
            .cloned()
            .ok_or(SupervisorError::OutOfRange {
                id,
                len: slots.commands.len(),
            })
    }

    /// Number of registered commands
    pub fn len(&self) -> usize {
        self.slots.read().map(|slots| slots.commands.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self, id: CommandId) -> Result<CmdState> {
        self.get(id).map(|managed| managed.state())
    }

    /// Take the queue receivers of a command registered with queue delivery.
    ///
    /// The line queues must be drained for as long as the command runs, or
    /// its readers, and with them the supervision loop, stall.
    pub fn take_events(&self, id: CommandId) -> Result<CommandEvents> {
        self.get(id)?.take_events()
    }

    /// Supervise the command until it stops for good.
    ///
    /// Fails with [`SupervisorError::InvalidState`] if it is already running.
    pub async fn start(&self, id: CommandId) -> Result<()> {
        let managed = self.get(id)?;
        engine::supervise(managed, Arc::clone(&self.observer)).await
    }

    /// Ids of commands that are not started, in registration order
    fn eligible(&self) -> Result<Vec<CommandId>> {
        let slots = self.slots.read().map_err(|_| SupervisorError::LockPoisoned)?;
        Ok(slots
            .commands
            .iter()
            .filter(|managed| managed.state() == CmdState::NotStarted && !managed.is_running())
            .map(|managed| managed.id())
            .collect())
    }

    /// Start every not-started command, one after the other.
    ///
    /// The set of commands is fixed when the call begins; commands registered
    /// afterwards are not picked up.
    pub async fn start_all(&self) -> Result<()> {
        for id in self.eligible()? {
            if let Err(e) = self.start(id).await {
                debug!("Command {} ended with: {}", id, e);
            }
        }
        Ok(())
    }

    /// Start every not-started command concurrently.
    ///
    /// The returned handle resolves once each launched command is back in
    /// `NotStarted`, whatever exit hooks the commands carry.
    pub fn start_all_parallel(self: &Arc<Self>) -> Result<ParallelStart> {
        let mut runs = ParallelStart::default();
        for id in self.eligible()? {
            let registry = Arc::clone(self);
            runs.push(id, tokio::spawn(async move { registry.start(id).await }));
        }
        Ok(runs)
    }

    /// Relay `signal` to the command's live process.
    ///
    /// `SIGKILL` marks the command killed so it is not restarted, and is
    /// accepted in any state but not-started. Other signals require the
    /// command to be started and are relayed unmodified.
    pub fn signal(&self, id: CommandId, signal: Signal) -> Result<()> {
        let managed = self.get(id)?;
        info!("{}signalling {} with {}", managed.prefix(), managed.signature(), signal);

        if signal == Signal::SIGKILL {
            return self.kill_managed(&managed);
        }

        let state = managed.state();
        if state != CmdState::Started {
            return Err(SupervisorError::InvalidState { id, state });
        }
        managed.process().signal(signal).map_err(|e| {
            self.observer.observe(&format!("{}error relaying {}", managed.prefix(), signal), &e);
            e.into()
        })
    }

    /// Forcibly stop the command and keep it from restarting
    pub fn kill(&self, id: CommandId) -> Result<()> {
        self.signal(id, Signal::SIGKILL)
    }

    fn kill_managed(&self, managed: &ManagedCommand) -> Result<()> {
        managed.mark_killed()?;
        match managed.process().signal(Signal::SIGKILL) {
            // between attempts: the loop sees the state before the next spawn
            Ok(()) | Err(ProcessError::NotRunning) => Ok(()),
            Err(e) => {
                self.observer.observe(&format!("{}error killing process", managed.prefix()), &e);
                Err(e.into())
            }
        }
    }

    /// Hard kill through the external `kill` utility, bypassing the signal path
    pub async fn terminate(&self, id: CommandId) -> Result<()> {
        let managed = self.get(id)?;
        managed.process().terminate().await.map_err(|e| {
            self.observer.observe(&format!("{}error terminating process", managed.prefix()), &e);
            e.into()
        })
    }

    /// Kill every running command, reporting failures without stopping the sweep.
    ///
    /// Hooks fired by the kills may call back into the registry.
    pub fn cleanup(&self) {
        let running: Vec<Arc<ManagedCommand>> = {
            let slots = match self.slots.read() {
                Ok(slots) => slots,
                Err(poisoned) => poisoned.into_inner(),
            };
            slots
                .commands
                .iter()
                .filter(|m| m.state() != CmdState::NotStarted)
                .cloned()
                .collect()
        };
        for managed in running {
            info!("{}cleaning up {}", managed.prefix(), managed.signature());
            if let Err(e) = self.kill_managed(&managed) {
                self.observer.observe(&format!("{}cleanup failed", managed.prefix()), &e);
            }
        }
    }

    /// Program and raw arguments joined by spaces, empty for an unknown id
    pub fn command_string(&self, id: CommandId) -> String {
        self.get(id)
            .map(|managed| managed.command().display_string())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CountErrors;

    #[test]
    fn test_register_reuses_slot_for_same_signature() {
        let registry = Registry::new();
        let first = registry.register(Command::new("echo", ["1"])).unwrap();
        let other = registry.register(Command::new("echo", ["2"])).unwrap();
        let again = registry.register(Command::builder("echo").arg("1").label("again").build()).unwrap();

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(first).unwrap().prefix(), "again: ");
        assert_eq!(registry.state(first).unwrap(), CmdState::NotStarted);
    }

    #[test]
    fn test_first_slot_is_reused_too() {
        let registry = Registry::new();
        let id = registry.register(Command::new("ps", ["ux"])).unwrap();
        assert_eq!(id, CommandId(0));
        assert_eq!(registry.register(Command::new("ps", ["ux"])).unwrap(), CommandId(0));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_out_of_range() {
        let registry = Registry::new();
        assert!(matches!(
            registry.kill(CommandId(4)),
            Err(SupervisorError::OutOfRange { len: 0, .. })
        ));
        assert_eq!(registry.command_string(CommandId(4)), "");
    }

    #[test]
    fn test_command_string() {
        let registry = Registry::new();
        let id = registry.register(Command::new("ps", ["ux"])).unwrap();
        assert_eq!(registry.command_string(id), "ps ux");
    }

    #[test]
    fn test_signal_requires_started() {
        let registry = Registry::new();
        let id = registry.register(Command::new("sleep", ["1"])).unwrap();
        assert!(matches!(
            registry.signal(id, Signal::SIGTERM),
            Err(SupervisorError::InvalidState {
                state: CmdState::NotStarted,
                ..
            })
        ));
        assert!(matches!(registry.kill(id), Err(SupervisorError::InvalidState { .. })));
    }

    #[test]
    fn test_cleanup_skips_idle_commands() {
        let errors = Arc::new(CountErrors::new());
        let registry = Registry::builder().error_observer(errors.clone()).build().unwrap();
        registry.register(Command::new("echo", ["1"])).unwrap();
        registry.cleanup();
        assert_eq!(errors.count(), 0);
    }

    #[test]
    fn test_take_events_requires_queues() {
        let registry = Registry::new();
        let plain = registry.register(Command::new("echo", ["1"])).unwrap();
        let queued = registry.register(Command::builder("echo").arg("2").queues(4, 4).build()).unwrap();

        assert!(matches!(
            registry.take_events(plain),
            Err(SupervisorError::EventsUnavailable(_))
        ));
        assert!(registry.take_events(queued).is_ok());
    }
}
