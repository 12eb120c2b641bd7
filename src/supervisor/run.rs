//! One-shot helpers that run a command and hand back its output

use std::sync::{Arc, Mutex, OnceLock};

use super::{Registry, engine};
use crate::error::SupervisorError;
use crate::process::{Command, LineHook, ManagedCommand};

static DEFAULT_REGISTRY: OnceLock<Arc<Registry>> = OnceLock::new();

/// Process-wide registry used by [`run_capture`] and [`run_lines`].
///
/// Created on first use; it installs no interrupt handler.
pub fn default_registry() -> &'static Arc<Registry> {
    DEFAULT_REGISTRY.get_or_init(Registry::new)
}

/// Output of [`run_capture`], one string per stream
#[derive(Debug, Default)]
pub struct RunOutput {
    /// Every stdout line followed by a newline
    pub stdout: String,
    /// Every stderr line followed by a newline
    pub stderr: String,
    /// Spawn failure, or the non-zero exit of the last attempt
    pub error: Option<SupervisorError>,
    /// Exit code of the last attempt; 0 if nothing was spawned
    pub exit_code: i32,
}

/// Output of [`run_lines`], one entry per line
#[derive(Debug, Default)]
pub struct RunLines {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub error: Option<SupervisorError>,
    pub exit_code: i32,
}

/// Run `command` on the default registry and capture its output as text.
///
/// Hooks already set on the command still fire, before the line is captured.
pub async fn run_capture(command: Command) -> RunOutput {
    let (stdout, stderr, error, exit_code) = run_collecting(command).await;
    RunOutput {
        stdout: joined(stdout),
        stderr: joined(stderr),
        error,
        exit_code,
    }
}

/// Run `command` on the default registry and capture its output line by line
pub async fn run_lines(command: Command) -> RunLines {
    let (stdout, stderr, error, exit_code) = run_collecting(command).await;
    RunLines {
        stdout,
        stderr,
        error,
        exit_code,
    }
}

async fn run_collecting(mut command: Command) -> (Vec<String>, Vec<String>, Option<SupervisorError>, i32) {
    let stdout = Arc::new(Mutex::new(Vec::new()));
    let stderr = Arc::new(Mutex::new(Vec::new()));
    command.hooks.on_stdout = Some(collecting(command.hooks.on_stdout.take(), Arc::clone(&stdout)));
    command.hooks.on_stderr = Some(collecting(command.hooks.on_stderr.take(), Arc::clone(&stderr)));

    let registry = default_registry();
    let (error, exit_code) = match registry.register_managed(command) {
        Ok(managed) => {
            let outcome = engine::supervise(Arc::clone(&managed), Arc::clone(registry.observer())).await;
            let error = outcome.err().or_else(|| managed.last_error().map(SupervisorError::Process));
            (error, managed.last_exit_code())
        }
        Err(e) => (Some(e), 0),
    };

    (drain(&stdout), drain(&stderr), error, exit_code)
}

/// Wrap `inner` so every line is also pushed onto `lines`
fn collecting(inner: Option<LineHook>, lines: Arc<Mutex<Vec<String>>>) -> LineHook {
    Arc::new(move |managed: &ManagedCommand, line: &str| {
        lines.lock().unwrap_or_else(|e| e.into_inner()).push(line.to_string());
        match &inner {
            Some(hook) => hook(managed, line),
            None => Ok(()),
        }
    })
}

fn drain(lines: &Mutex<Vec<String>>) -> Vec<String> {
    std::mem::take(&mut *lines.lock().unwrap_or_else(|e| e.into_inner()))
}

fn joined(lines: Vec<String>) -> String {
    lines.into_iter().map(|line| line + "\n").collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessError;

    #[tokio::test]
    async fn test_run_capture_echo() {
        let output = run_capture(Command::builder("echo").arg("run-capture-echo").hide_stdout(true).build()).await;
        assert!(output.error.is_none());
        assert_eq!(output.stdout, "run-capture-echo\n");
        assert_eq!(output.stderr, "");
        assert_eq!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn test_run_lines_keeps_streams_apart() {
        let output = run_lines(
            Command::builder("sh")
                .args(["-c", "echo out1; echo err1 >&2; echo out2; exit 4"])
                .hide_stdout(true)
                .hide_stderr(true)
                .build(),
        )
        .await;
        assert_eq!(output.stdout, ["out1", "out2"]);
        assert_eq!(output.stderr, ["err1"]);
        assert_eq!(output.exit_code, 4);
        match output.error {
            Some(SupervisorError::Process(err)) => {
                assert!(matches!(*err, ProcessError::NonZeroExit(_)));
                assert_eq!(err.exit_code(), Some(4));
            }
            other => panic!("expected a non-zero exit error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_capture_reports_crash() {
        let output = run_capture(Command::builder("sh").args(["-c", "exit 4"]).build()).await;
        assert_eq!(output.exit_code, 4);
        assert!(matches!(output.error, Some(SupervisorError::Process(_))));
    }

    #[tokio::test]
    async fn test_run_capture_clean_exit_has_no_error() {
        let output = run_capture(Command::builder("sh").args(["-c", "exit 0"]).build()).await;
        assert_eq!(output.exit_code, 0);
        assert!(output.error.is_none());
    }

    #[tokio::test]
    async fn test_run_capture_calls_existing_hook() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let output = run_capture(
            Command::builder("echo")
                .arg("run-capture-hooked")
                .hide_stdout(true)
                .on_stdout(move |_, line| {
                    sink.lock().unwrap().push(line.to_string());
                    Ok(())
                })
                .build(),
        )
        .await;
        assert_eq!(output.stdout, "run-capture-hooked\n");
        assert_eq!(seen.lock().unwrap().as_slice(), ["run-capture-hooked"]);
    }

    #[tokio::test]
    async fn test_run_capture_spawn_failure() {
        let output = run_capture(Command::new("procwarden-run-missing", Vec::<String>::new())).await;
        assert!(matches!(output.error, Some(SupervisorError::Process(_))));
        assert_eq!(output.exit_code, 0);
        assert!(output.stdout.is_empty());
    }
}
