//! Queue delivery of output lines and lifecycle events
//!
//! Line queues are bounded and a full queue blocks the reader of that stream,
//! which keeps lines in order and pushes back on the child process. Lifecycle
//! queues (state, completion, exit) are unbounded so publishing never waits
//! on a slow consumer, while still preserving the order of events.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;

use super::command::QueueConfig;
use super::state::CmdState;
use super::stream::{LineStream, OutputStream};

/// Receiving ends of a command's queues, handed out once
pub struct CommandEvents {
    pub stdout: LineStream,
    pub stderr: LineStream,
    /// Duration of every finished spawn attempt
    pub completed: mpsc::UnboundedReceiver<Duration>,
    /// One message when the command stops for good
    pub exit: mpsc::UnboundedReceiver<()>,
    /// Every new state, in transition order
    pub state: mpsc::UnboundedReceiver<CmdState>,
}

impl fmt::Debug for CommandEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandEvents").finish_non_exhaustive()
    }
}

/// Sending ends kept by the command
#[derive(Debug, Default)]
pub(crate) struct EventSink {
    stdout: Option<mpsc::Sender<String>>,
    stderr: Option<mpsc::Sender<String>>,
    completed: Option<mpsc::UnboundedSender<Duration>>,
    exit: Option<mpsc::UnboundedSender<()>>,
    state: Option<mpsc::UnboundedSender<CmdState>>,
}

impl EventSink {
    /// Sink that delivers nothing
    pub(crate) fn disabled() -> Self {
        Self::default()
    }

    /// Allocate all five queues
    pub(crate) fn channels(config: QueueConfig) -> (Self, CommandEvents) {
        let (stdout_tx, stdout_rx) = mpsc::channel(config.stdout_capacity.max(1));
        let (stderr_tx, stderr_rx) = mpsc::channel(config.stderr_capacity.max(1));
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = mpsc::unbounded_channel();

        let sink = Self {
            stdout: Some(stdout_tx),
            stderr: Some(stderr_tx),
            completed: Some(completed_tx),
            exit: Some(exit_tx),
            state: Some(state_tx),
        };
        let events = CommandEvents {
            stdout: LineStream::new(stdout_rx),
            stderr: LineStream::new(stderr_rx),
            completed: completed_rx,
            exit: exit_rx,
            state: state_rx,
        };
        (sink, events)
    }

    /// Queue a line, waiting for room in the queue
    pub(crate) async fn line(&self, stream: OutputStream, line: String) {
        let tx = match stream {
            OutputStream::Stdout => &self.stdout,
            OutputStream::Stderr => &self.stderr,
        };
        if let Some(tx) = tx {
            // a dropped receiver means nobody listens anymore
            let _ = tx.send(line).await;
        }
    }

    pub(crate) fn state(&self, state: CmdState) {
        if let Some(tx) = &self.state {
            let _ = tx.send(state);
        }
    }

    pub(crate) fn completed(&self, elapsed: Duration) {
        if let Some(tx) = &self.completed {
            let _ = tx.send(elapsed);
        }
    }

    pub(crate) fn exit(&self) {
        if let Some(tx) = &self.exit {
            let _ = tx.send(());
        }
    }
}
