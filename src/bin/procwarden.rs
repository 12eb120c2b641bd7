// Supervise commands from a config file or the command line

use anyhow::{Result, bail};
use clap::Parser;
use log::{error, info, warn};
use procwarden::config::{CommandConfig, ConfigBuilder, LogLevel, SupervisorConfig};
use procwarden::supervisor::Registry;
use procwarden::util::logging;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "procwarden", version, about = "Supervise and restart child processes")]
struct Args {
    /// Path to a configuration file listing the commands to supervise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Restarts for the command given after `--`: -1 forever, 0 run once
    #[arg(short = 'r', long, default_value = "0", allow_hyphen_values = true)]
    max_restart: i64,

    /// Delay between restarts in milliseconds
    #[arg(short = 'd', long, default_value = "1000")]
    restart_delay_ms: u64,

    /// Log prefix for the command given after `--`
    #[arg(short, long)]
    label: Option<String>,

    /// Start commands one after the other instead of all at once
    #[arg(short, long)]
    sequential: bool,

    /// Logging level, overrides the configuration file
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Program and arguments to supervise
    #[arg(last = true)]
    command: Vec<String>,
}

impl Args {
    /// Command described on the command line, if any
    fn inline_command(&self) -> Option<CommandConfig> {
        let (program, args) = self.command.split_first()?;
        Some(CommandConfig {
            program: program.clone(),
            args: args.to_vec(),
            work_dir: None,
            label: self.label.clone(),
            inherit_env: true,
            env: BTreeMap::new(),
            start_delay_ms: 0,
            restart_delay_ms: self.restart_delay_ms,
            max_restart: self.max_restart,
            hide_stdout: false,
            hide_stderr: false,
            use_queues: false,
            stdout_capacity: None,
            stderr_capacity: None,
            backoff: None,
        })
    }
}

fn load(args: &Args) -> procwarden::error::Result<SupervisorConfig> {
    let mut config = match &args.config {
        Some(path) => ConfigBuilder::new().file(path)?.env().build()?,
        None => SupervisorConfig::empty(),
    };
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(command) = args.inline_command() {
        config.commands.push(command);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    let config = match load(&args) {
        Ok(config) => {
            logging::init(config.log_level);
            config
        }
        Err(e) => {
            // Initialize logger with default level for error reporting
            logging::init(LogLevel::Error);
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if config.commands.is_empty() {
        bail!("Nothing to supervise: pass --config <file> or -- <program> [args...]");
    }

    let registry: Arc<Registry> = config.registry_builder().cleanup_on_signal(true).build()?;
    for builder in config.command_builders() {
        let id = registry.register(builder.build())?;
        info!("Registered {}: {}", id, registry.command_string(id));
    }

    let mut failures = 0;
    if args.sequential {
        registry.start_all().await?;
    } else {
        for (id, outcome) in registry.start_all_parallel()?.wait().await {
            if let Err(e) = outcome {
                warn!("Command {} failed: {}", id, e);
                failures += 1;
            }
        }
    }

    registry.cleanup();
    info!("All commands stopped");
    if failures > 0 {
        bail!("{} command(s) failed", failures);
    }
    Ok(())
}
