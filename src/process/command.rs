use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command as TokioCommand;

use super::hooks::{Hooks, RestartHook};
use super::managed::ManagedCommand;
use super::state::CmdState;

/// Stable identifier handed out by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(pub(crate) usize);

impl CommandId {
    /// Position of the command in the registry
    pub fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for CommandId {
    fn from(index: usize) -> Self {
        CommandId(index)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How many times a command is spawned again after a spawn attempt ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    /// Run exactly once
    #[default]
    Never,
    /// Restart after every termination until killed
    Forever,
    /// The initial run plus this many restarts
    Times(u32),
}

impl RestartPolicy {
    /// Map the integer convention used in config files: `-1` forever, `0` once
    pub fn from_max_restart(max_restart: i64) -> Self {
        match max_restart {
            n if n < 0 => RestartPolicy::Forever,
            0 => RestartPolicy::Never,
            n => RestartPolicy::Times(u32::try_from(n).unwrap_or(u32::MAX)),
        }
    }

    /// Maximum number of restarts, `None` for forever
    pub fn max_restart(&self) -> Option<u32> {
        match self {
            RestartPolicy::Never => Some(0),
            RestartPolicy::Forever => None,
            RestartPolicy::Times(n) => Some(*n),
        }
    }

    /// True once `restart_count` completed attempts used up the budget
    pub fn is_exhausted(&self, restart_count: u32) -> bool {
        match self.max_restart() {
            Some(max) => restart_count > max,
            None => false,
        }
    }
}

/// Capacities of the per-command line queues.
///
/// A capacity of zero asks for the tightest bound available, which is one
/// line: tokio channels cannot be unbuffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueConfig {
    pub stdout_capacity: usize,
    pub stderr_capacity: usize,
}

/// Description of one supervised program
#[derive(Debug, Clone)]
pub struct Command {
    /// Program to execute, full path or looked up in PATH
    pub(crate) program: String,

    /// Arguments to pass to the program
    pub(crate) args: Vec<String>,

    /// Working directory
    pub(crate) work_dir: Option<PathBuf>,

    /// Replaces `CMD:<id>` as the log prefix
    pub(crate) label: Option<String>,

    /// Whether the child sees the supervisor's environment
    pub(crate) inherit_env: bool,

    /// Extra environment variables
    pub(crate) env: Vec<(String, String)>,

    pub(crate) start_delay: Duration,
    pub(crate) restart_delay: Duration,
    pub(crate) restart: RestartPolicy,

    /// Suppress echoing stdout to the log
    pub(crate) hide_stdout: bool,

    /// Suppress echoing stderr to the log
    pub(crate) hide_stderr: bool,

    pub(crate) hooks: Hooks,

    /// Queue delivery, disabled when `None`
    pub(crate) queues: Option<QueueConfig>,
}

impl Command {
    /// Start building a command for `program`
    pub fn builder<S: Into<String>>(program: S) -> CommandBuilder {
        CommandBuilder::new(program)
    }

    /// Command with arguments and default policy (run once, no hooks)
    pub fn new<S, I, A>(program: S, args: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        CommandBuilder::new(program).args(args).build()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_deref()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        self.restart
    }

    pub fn start_delay(&self) -> Duration {
        self.start_delay
    }

    pub fn restart_delay(&self) -> Duration {
        self.restart_delay
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn uses_queues(&self) -> bool {
        self.queues.is_some()
    }

    /// Canonical form used to deduplicate registrations.
    ///
    /// Program followed by each argument double-quoted, with backslashes and
    /// quotes escaped. Environment and working directory are not part of it.
    pub fn signature(&self) -> String {
        if self.args.is_empty() {
            return self.program.clone();
        }
        let quoted: Vec<String> = self
            .args
            .iter()
            .map(|arg| format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\"")))
            .collect();
        format!("{} {}", self.program, quoted.join(" "))
    }

    /// Program and raw arguments joined by spaces, for display
    pub fn display_string(&self) -> String {
        if self.args.is_empty() {
            return self.program.clone();
        }
        format!("{} {}", self.program, self.args.join(" "))
    }

    /// Whether a reader task is needed for stdout
    pub(crate) fn wants_stdout(&self) -> bool {
        self.hooks.on_stdout.is_some() || !self.hide_stdout || self.queues.is_some()
    }

    /// Whether a reader task is needed for stderr
    pub(crate) fn wants_stderr(&self) -> bool {
        self.hooks.on_stderr.is_some() || !self.hide_stderr || self.queues.is_some()
    }

    /// Fresh OS process binding for one spawn attempt
    pub(crate) fn to_process_command(&self) -> TokioCommand {
        let mut cmd = TokioCommand::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(if self.wants_stdout() { Stdio::piped() } else { Stdio::null() })
            .stderr(if self.wants_stderr() { Stdio::piped() } else { Stdio::null() })
            .kill_on_drop(true);

        if let Some(dir) = &self.work_dir {
            cmd.current_dir(dir);
        }

        if !self.inherit_env {
            cmd.env_clear();
        }
        for (key, val) in &self.env {
            cmd.env(key, val);
        }

        cmd
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

/// Builder for commands
pub struct CommandBuilder {
    command: Command,
}

impl CommandBuilder {
    /// Create a new command builder
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            command: Command {
                program: program.into(),
                args: Vec::new(),
                work_dir: None,
                label: None,
                inherit_env: true,
                env: Vec::new(),
                start_delay: Duration::ZERO,
                restart_delay: Duration::ZERO,
                restart: RestartPolicy::Never,
                hide_stdout: false,
                hide_stderr: false,
                hooks: Hooks::default(),
                queues: None,
            },
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.command.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory
    pub fn work_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.command.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Log prefix used instead of `CMD:<id>`
    pub fn label<S: Into<String>>(mut self, label: S) -> Self {
        self.command.label = Some(label.into());
        self
    }

    /// Inherit the supervisor's environment (default) or start from an empty one
    pub fn inherit_env(mut self, inherit: bool) -> Self {
        self.command.inherit_env = inherit;
        self
    }

    /// Add an environment variable
    pub fn env<K, V>(mut self, key: K, val: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.command.env.push((key.into(), val.into()));
        self
    }

    /// Add multiple environment variables
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, val) in vars {
            self.command.env.push((key.into(), val.into()));
        }
        self
    }

    /// Delay applied once before the first spawn
    pub fn start_delay(mut self, delay: Duration) -> Self {
        self.command.start_delay = delay;
        self
    }

    /// Delay between a termination and the next spawn
    pub fn restart_delay(mut self, delay: Duration) -> Self {
        self.command.restart_delay = delay;
        self
    }

    pub fn restart(mut self, policy: RestartPolicy) -> Self {
        self.command.restart = policy;
        self
    }

    pub fn hide_stdout(mut self, hide: bool) -> Self {
        self.command.hide_stdout = hide;
        self
    }

    pub fn hide_stderr(mut self, hide: bool) -> Self {
        self.command.hide_stderr = hide;
        self
    }

    /// Enable queue delivery with the given line-queue capacities
    pub fn queues(mut self, stdout_capacity: usize, stderr_capacity: usize) -> Self {
        self.command.queues = Some(QueueConfig {
            stdout_capacity,
            stderr_capacity,
        });
        self
    }

    /// Replace all hooks at once
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.command.hooks = hooks;
        self
    }

    pub fn on_stdout<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ManagedCommand, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.command.hooks.on_stdout = Some(std::sync::Arc::new(hook));
        self
    }

    pub fn on_stderr<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ManagedCommand, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.command.hooks.on_stderr = Some(std::sync::Arc::new(hook));
        self
    }

    /// Compute the restart delay dynamically; overrides `restart_delay`
    pub fn on_restart<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ManagedCommand) -> Duration + Send + Sync + 'static,
    {
        self.command.hooks.on_restart = Some(std::sync::Arc::new(hook));
        self
    }

    /// Shared form of [`CommandBuilder::on_restart`], e.g. from [`crate::backoff::Backoff::into_hook`]
    pub fn restart_hook(mut self, hook: RestartHook) -> Self {
        self.command.hooks.on_restart = Some(hook);
        self
    }

    pub fn on_process_completed<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ManagedCommand, Duration) + Send + Sync + 'static,
    {
        self.command.hooks.on_process_completed = Some(std::sync::Arc::new(hook));
        self
    }

    pub fn on_exit<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ManagedCommand) + Send + Sync + 'static,
    {
        self.command.hooks.on_exit = Some(std::sync::Arc::new(hook));
        self
    }

    pub fn on_state_changed<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ManagedCommand, CmdState, CmdState) + Send + Sync + 'static,
    {
        self.command.hooks.on_state_changed = Some(std::sync::Arc::new(hook));
        self
    }

    /// Build the command
    pub fn build(self) -> Command {
        self.command
    }
}
