//! The supervision loop of a single command
//!
//! ```text
//!   NotStarted ──spawn──► Started ──wait──► Exited | Crashed | Killed
//!        ▲                   ▲                        │
//!        │                   └──── restart delay ◄────┤ budget left
//!        └──────────────── budget exhausted / killed ◄┘
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout_at};

use crate::error::{ErrorObserver, Result, SupervisorError};
use crate::process::{CmdState, ManagedCommand, OutputStream, ProcessError, pump_lines};

/// How long output readers may keep going once the process is gone.
///
/// A pipe stays open while a grandchild holds it; readers still running
/// after this window are aborted.
const READER_DRAIN: Duration = Duration::from_millis(500);

/// Drive `managed` through spawn, capture, wait and restart until it stops.
///
/// Returns once the command is back in `NotStarted`. A spawn failure ends
/// the run immediately with the error; a process that exits with an error
/// is restarted according to its policy.
pub(crate) async fn supervise(
    managed: Arc<ManagedCommand>,
    observer: Arc<dyn ErrorObserver>,
) -> Result<()> {
    let _claim = managed.claim()?;
    let command = managed.command();
    let prefix = managed.prefix();

    if !command.start_delay().is_zero() {
        sleep(command.start_delay()).await;
    }

    let outcome = loop {
        match run_attempt(&managed, &observer).await {
            Ok(true) => {}
            Ok(false) => {
                info!("{}killed before spawning", prefix);
                break Ok(());
            }
            Err(e) => break Err(e),
        }

        let restarts = managed.bump_restart_count();
        if managed.state() == CmdState::Killed {
            info!("{}killed, not restarting", prefix);
            break Ok(());
        }
        if command.restart_policy().is_exhausted(restarts) {
            info!("{}max restart reached {:?}", prefix, command.restart_policy().max_restart());
            break Ok(());
        }

        let delay = managed.next_restart_delay();
        debug!("{}restarting in {:?}", prefix, delay);
        sleep(delay).await;

        if managed.state() == CmdState::Killed {
            info!("{}killed while waiting to restart", prefix);
            break Ok(());
        }
        info!("{}restarting.. x{} {}", prefix, restarts, managed.signature());
    };

    managed.transition(CmdState::NotStarted);
    managed.reset_restart_count();
    managed.publish_exit();

    outcome
}

/// One spawn attempt, from process creation to its completion event.
///
/// Returns `false` without spawning if the command was already killed.
async fn run_attempt(managed: &Arc<ManagedCommand>, observer: &Arc<dyn ErrorObserver>) -> Result<bool> {
    let command = managed.command();
    let prefix = managed.prefix();
    let previous = managed.state();
    if previous == CmdState::Killed {
        return Ok(false);
    }

    info!("{}starting: {}", prefix, managed.signature());
    let started = Instant::now();

    let mut child = match command.to_process_command().spawn() {
        Ok(child) => child,
        Err(e) => {
            let err = Arc::new(ProcessError::Spawn(e));
            observer.observe(&format!("{}error starting {}", prefix, managed.signature()), &*err);
            managed.set_outcome(0, Some(Arc::clone(&err)));
            managed.publish_completed(started.elapsed());
            return Err(SupervisorError::Process(err));
        }
    };

    let pipes = take_pipe(child.stdout.take(), command.wants_stdout(), "stdout").and_then(|stdout| {
        take_pipe(child.stderr.take(), command.wants_stderr(), "stderr").map(|stderr| (stdout, stderr))
    });
    let (stdout, stderr) = match pipes {
        Ok(pipes) => pipes,
        Err(e) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            let err = Arc::new(e);
            observer.observe(&format!("{}error starting {}", prefix, managed.signature()), &*err);
            managed.set_outcome(0, Some(Arc::clone(&err)));
            managed.publish_completed(started.elapsed());
            return Err(SupervisorError::Process(err));
        }
    };

    managed.process().bind(child.id());
    if !managed.transition_from(previous, CmdState::Started) {
        // killed between attempts, after the state check but before binding
        let _ = child.start_kill();
    }

    let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
    if let Some(stdout) = stdout {
        readers.push(tokio::spawn(pump_lines(
            stdout,
            OutputStream::Stdout,
            Arc::clone(managed),
            Arc::clone(observer),
        )));
    }
    if let Some(stderr) = stderr {
        readers.push(tokio::spawn(pump_lines(
            stderr,
            OutputStream::Stderr,
            Arc::clone(managed),
            Arc::clone(observer),
        )));
    }

    let status = child.wait().await;
    managed.process().release();
    let killed = managed.state() == CmdState::Killed;

    let (next, exit_code, error) = match status {
        Ok(status) if status.success() => (CmdState::Exited, 0, None),
        Ok(status) => {
            let err = ProcessError::NonZeroExit(status);
            let code = err.exit_code().unwrap_or(0);
            (CmdState::Crashed, code, Some(Arc::new(err)))
        }
        Err(e) => (CmdState::Crashed, 0, Some(Arc::new(ProcessError::Wait(e)))),
    };

    match &error {
        Some(err) if !killed => {
            observer.observe(&format!("{}error waiting for {}", prefix, managed.signature()), &*err);
        }
        Some(err) => info!("{}killed: {}", prefix, err),
        None => info!("{}exited", prefix),
    }

    managed.set_outcome(exit_code, error);
    managed.transition_from(CmdState::Started, next);

    let deadline = tokio::time::Instant::now() + READER_DRAIN;
    for mut reader in readers {
        match timeout_at(deadline, &mut reader).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => observer.observe(&format!("{}output reader failed", prefix), &e),
            Err(_) => {
                debug!("{}output still open after exit, detaching reader", prefix);
                reader.abort();
            }
        }
    }

    managed.publish_completed(started.elapsed());
    Ok(true)
}

fn take_pipe<T>(pipe: Option<T>, wanted: bool, name: &'static str) -> std::result::Result<Option<T>, ProcessError> {
    match (wanted, pipe) {
        (false, _) => Ok(None),
        (true, Some(pipe)) => Ok(Some(pipe)),
        (true, None) => Err(ProcessError::Pipe(name)),
    }
}
