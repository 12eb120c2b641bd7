use std::sync::Mutex;

use log::debug;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Command as TokioCommand;

use super::error::{ProcessError, ProcessResult};

/// Binding to the OS process of the current spawn attempt.
///
/// Only the supervision task binds and releases it. Other tasks use it to
/// relay signals, under the same lock, so a signal never reaches a pid that
/// was already released.
#[derive(Debug, Default)]
pub struct ProcessHandle {
    pid: Mutex<Option<u32>>,
}

impl ProcessHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// OS identifier of the live process, if any
    pub fn pid(&self) -> Option<u32> {
        *self.pid.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn bind(&self, pid: Option<u32>) {
        *self.pid.lock().unwrap_or_else(|e| e.into_inner()) = pid;
    }

    pub(crate) fn release(&self) {
        self.bind(None);
    }

    /// Deliver `signal` to the live process
    pub fn signal(&self, signal: Signal) -> ProcessResult<()> {
        let guard = self.pid.lock().unwrap_or_else(|e| e.into_inner());
        let pid = guard.ok_or(ProcessError::NotRunning)?;
        debug!("Sending {} to pid {}", signal, pid);
        signal::kill(Pid::from_raw(pid as i32), signal)
            .map_err(|source| ProcessError::Signal { signal, source })
    }

    /// Hard kill through the external `kill` utility
    pub async fn terminate(&self) -> ProcessResult<()> {
        let pid = self.pid().ok_or(ProcessError::NotRunning)?;
        debug!("Running kill {}", pid);
        let status = TokioCommand::new("kill")
            .arg(pid.to_string())
            .status()
            .await
            .map_err(|e| ProcessError::Terminate(e.to_string()))?;
        if status.success() {
            Ok(())
        } else {
            Err(ProcessError::Terminate(format!("kill {} exited with {}", pid, status)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_without_process() {
        let handle = ProcessHandle::new();
        assert!(matches!(handle.signal(Signal::SIGTERM), Err(ProcessError::NotRunning)));
    }

    #[tokio::test]
    async fn test_signal_live_process() {
        let mut child = TokioCommand::new("sleep").arg("5").spawn().unwrap();
        let handle = ProcessHandle::new();
        handle.bind(child.id());
        assert_eq!(handle.pid(), child.id());

        handle.signal(Signal::SIGKILL).unwrap();
        let status = child.wait().await.unwrap();
        assert!(!status.success());

        handle.release();
        assert_eq!(handle.pid(), None);
    }

    #[tokio::test]
    async fn test_terminate_live_process() {
        let mut child = TokioCommand::new("sleep").arg("5").spawn().unwrap();
        let handle = ProcessHandle::new();
        handle.bind(child.id());

        handle.terminate().await.unwrap();
        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }
}
