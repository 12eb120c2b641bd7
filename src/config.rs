use config::{self, Environment, File, FileFormat};
use log::{debug, error};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::backoff::Backoff;
use crate::error::{CountErrors, ErrorObserver, LogErrors, PrintErrors, Result, SupervisorError};
use crate::process::{Command, CommandBuilder, RestartPolicy};
use crate::supervisor::RegistryBuilder;

/// Prefix of environment variables overriding file settings
pub const ENV_PREFIX: &str = "PROCWARDEN";

/// Supervisor configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SupervisorConfig {
    /// Logging level
    #[serde(default)]
    pub log_level: LogLevel,
    /// Where non-fatal errors go
    #[serde(default)]
    pub error_reporting: ErrorReporting,
    /// Kill all commands and exit on SIGINT/SIGTERM
    #[serde(default)]
    pub cleanup_on_signal: bool,
    /// Line queue capacity for commands that do not set their own
    #[serde(default = "default_queue_capacity")]
    pub default_queue_capacity: usize,
    /// Commands to supervise, in registration order
    #[serde(default)]
    pub commands: Vec<CommandConfig>,
}

/// Default line queue capacity
fn default_queue_capacity() -> usize {
    64
}

/// One supervised program as described in a config file
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CommandConfig {
    /// Program to execute
    pub program: String,
    /// Arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory
    #[serde(default)]
    pub work_dir: Option<String>,
    /// Log prefix instead of `CMD:<id>`
    #[serde(default)]
    pub label: Option<String>,
    /// Pass the supervisor's environment to the child
    #[serde(default = "default_inherit_env")]
    pub inherit_env: bool,
    /// Extra environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Delay before the first spawn in milliseconds
    #[serde(default)]
    pub start_delay_ms: u64,
    /// Delay between spawns in milliseconds
    #[serde(default)]
    pub restart_delay_ms: u64,
    /// `-1` restarts forever, `0` runs once, `N` restarts N times
    #[serde(default)]
    pub max_restart: i64,
    #[serde(default)]
    pub hide_stdout: bool,
    #[serde(default)]
    pub hide_stderr: bool,
    /// Deliver output and lifecycle events through queues
    #[serde(default)]
    pub use_queues: bool,
    #[serde(default)]
    pub stdout_capacity: Option<usize>,
    #[serde(default)]
    pub stderr_capacity: Option<usize>,
    /// Exponential restart delay, replaces `restart_delay_ms`
    #[serde(default)]
    pub backoff: Option<Backoff>,
}

/// Default for inheriting the environment
fn default_inherit_env() -> bool {
    true
}

impl CommandConfig {
    /// Builder preloaded with this configuration; hooks can be added on top
    pub fn into_builder(self, default_queue_capacity: usize) -> CommandBuilder {
        let mut builder = Command::builder(self.program)
            .args(self.args)
            .inherit_env(self.inherit_env)
            .envs(self.env)
            .start_delay(Duration::from_millis(self.start_delay_ms))
            .restart_delay(Duration::from_millis(self.restart_delay_ms))
            .restart(RestartPolicy::from_max_restart(self.max_restart))
            .hide_stdout(self.hide_stdout)
            .hide_stderr(self.hide_stderr);

        if let Some(dir) = self.work_dir {
            builder = builder.work_dir(dir);
        }
        if let Some(label) = self.label {
            builder = builder.label(label);
        }
        if self.use_queues {
            builder = builder.queues(
                self.stdout_capacity.unwrap_or(default_queue_capacity),
                self.stderr_capacity.unwrap_or(default_queue_capacity),
            );
        }
        if let Some(backoff) = self.backoff {
            builder = builder.restart_hook(backoff.into_hook());
        }
        builder
    }
}

/// Where non-fatal errors are reported
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ErrorReporting {
    /// Through the logger
    #[default]
    Log,
    /// Straight to standard error
    Print,
    /// Tallied without output
    Count,
}

/// Logging level
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level
    #[default]
    Info,
    /// Debug level
    Debug,
    /// Trace level
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("Unknown log level: {}", other)),
        }
    }
}

impl SupervisorConfig {
    /// Configuration with no commands and default settings
    pub fn empty() -> Self {
        Self {
            log_level: LogLevel::default(),
            error_reporting: ErrorReporting::default(),
            cleanup_on_signal: false,
            default_queue_capacity: default_queue_capacity(),
            commands: Vec::new(),
        }
    }

    /// Observer matching `error_reporting`
    pub fn observer(&self) -> Arc<dyn ErrorObserver> {
        match self.error_reporting {
            ErrorReporting::Log => Arc::new(LogErrors),
            ErrorReporting::Print => Arc::new(PrintErrors),
            ErrorReporting::Count => Arc::new(CountErrors::new()),
        }
    }

    /// Registry builder carrying the observer and signal settings
    pub fn registry_builder(&self) -> RegistryBuilder {
        RegistryBuilder::new()
            .error_observer(self.observer())
            .cleanup_on_signal(self.cleanup_on_signal)
    }

    /// Every configured command as a builder, in order
    pub fn command_builders(&self) -> Vec<CommandBuilder> {
        self.commands
            .iter()
            .cloned()
            .map(|command| command.into_builder(self.default_queue_capacity))
            .collect()
    }

    fn validate(self) -> Result<Self> {
        if let Some(index) = self.commands.iter().position(|c| c.program.trim().is_empty()) {
            error!("Command {} has no program", index);
            return Err(SupervisorError::Config(format!("Command {} has an empty program", index)));
        }
        Ok(self)
    }
}

/// Layered configuration: later sources override earlier ones
pub struct ConfigBuilder {
    inner: config::ConfigBuilder<config::builder::DefaultState>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            inner: config::Config::builder(),
        }
    }

    /// Add a configuration file; the format follows its extension
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());

        // Check if the file exists
        if !path.exists() {
            error!("Configuration file {} does not exist", path.display());
            return Err(SupervisorError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let format = file_format(path)?;
        let name = path
            .to_str()
            .ok_or_else(|| SupervisorError::Config(format!("Non UTF-8 config path: {}", path.display())))?;

        self.inner = self.inner.add_source(File::with_name(name).format(format));
        Ok(self)
    }

    /// Add TOML text
    pub fn toml_str(mut self, text: &str) -> Self {
        self.inner = self.inner.add_source(File::from_str(text, FileFormat::Toml));
        self
    }

    /// Add `PROCWARDEN_*` environment variables, `__` separating nested keys
    pub fn env(mut self) -> Self {
        self.inner = self
            .inner
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        self
    }

    pub fn build(self) -> Result<SupervisorConfig> {
        let config = self
            .inner
            .build()
            .map_err(|e| SupervisorError::Config(e.to_string()))?;

        // Deserialize configuration
        let parsed: SupervisorConfig = config
            .try_deserialize()
            .map_err(|e| SupervisorError::Config(e.to_string()))?;
        parsed.validate()
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a file extension to a config format
fn file_format(path: &Path) -> Result<FileFormat> {
    // Get the file extension
    let extension = match path.extension() {
        Some(ext) => ext.to_string_lossy().to_lowercase(),
        None => {
            error!("Configuration file has no extension");
            return Err(SupervisorError::Config(format!(
                "Configuration file has no extension: {}",
                path.display()
            )));
        }
    };

    match extension.as_str() {
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        format => {
            error!("Unsupported configuration format: {}", format);
            Err(SupervisorError::Config(format!("Unsupported config format: {}", format)))
        }
    }
}

/// Load supervisor configuration from a file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SupervisorConfig> {
    ConfigBuilder::new().file(path)?.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    const SAMPLE: &str = r#"
log_level = "debug"
error_reporting = "count"
default_queue_capacity = 8

[[commands]]
program = "echo"
args = ["1"]
label = "echo"

[[commands]]
program = "sleep"
args = ["2"]
max_restart = -1
restart_delay_ms = 250
use_queues = true
stderr_capacity = 2

[commands.env]
mode = "test"

[commands.backoff]
initial_delay_ms = 10
backoff_factor = 2.0
max_delay_ms = 100
jitter = false
"#;

    #[test]
    fn test_load_toml_file() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.error_reporting, ErrorReporting::Count);
        assert!(!config.cleanup_on_signal);
        assert_eq!(config.commands.len(), 2);

        let echo = &config.commands[0];
        assert_eq!(echo.program, "echo");
        assert_eq!(echo.args, ["1"]);
        assert!(echo.inherit_env);
        assert_eq!(echo.max_restart, 0);

        let sleep = &config.commands[1];
        assert_eq!(sleep.max_restart, -1);
        assert_eq!(sleep.env.get("mode").map(String::as_str), Some("test"));
        assert_eq!(sleep.backoff.as_ref().map(|b| b.max_delay_ms), Some(100));
    }

    #[test]
    fn test_command_builders() {
        let config = ConfigBuilder::new().toml_str(SAMPLE).build().unwrap();
        let commands: Vec<Command> = config.command_builders().into_iter().map(|b| b.build()).collect();

        assert_eq!(commands[0].label(), Some("echo"));
        assert_eq!(commands[0].restart_policy(), RestartPolicy::Never);
        assert!(!commands[0].uses_queues());

        assert_eq!(commands[1].restart_policy(), RestartPolicy::Forever);
        assert_eq!(commands[1].restart_delay(), Duration::from_millis(250));
        assert!(commands[1].uses_queues());
        assert!(commands[1].hooks().on_restart.is_some());
    }

    #[test]
    fn test_later_sources_override() {
        let config = ConfigBuilder::new()
            .toml_str(SAMPLE)
            .toml_str("log_level = \"warn\"")
            .build()
            .unwrap();
        assert_eq!(config.log_level, LogLevel::Warn);
        assert_eq!(config.commands.len(), 2);
    }

    #[test]
    fn test_defaults() {
        let config = ConfigBuilder::new().toml_str("").build().unwrap();
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.error_reporting, ErrorReporting::Log);
        assert_eq!(config.default_queue_capacity, 64);
        assert!(config.commands.is_empty());
    }

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("WARNING".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert_eq!("trace".parse::<LogLevel>(), Ok(LogLevel::Trace));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_empty_program_rejected() {
        let result = ConfigBuilder::new()
            .toml_str("[[commands]]\nprogram = \" \"\n")
            .build();
        assert!(matches!(result, Err(SupervisorError::Config(_))));
    }

    #[test]
    fn test_missing_and_unsupported_files() {
        assert!(matches!(
            load_config("/nonexistent/procwarden.toml"),
            Err(SupervisorError::Config(_))
        ));

        let file = Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(load_config(file.path()), Err(SupervisorError::Config(_))));
    }
}
