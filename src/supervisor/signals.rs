//! Interrupt cleanup: kill every supervised child before the process exits

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use log::{info, warn};
use tokio::runtime::Handle;
use tokio::signal::unix::{SignalKind, signal};

use super::Registry;
use crate::error::{Result, SupervisorError};

/// At most one cleanup handler per process
static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Install the SIGINT/SIGTERM cleanup handler for `registry`.
///
/// Returns `false` if a handler is already installed for another registry.
/// The handler only holds a weak reference, so it does not keep the registry
/// alive on its own.
pub(crate) fn install_cleanup(registry: &Arc<Registry>) -> Result<bool> {
    if INSTALLED.swap(true, Ordering::AcqRel) {
        warn!("Interrupt cleanup already installed, not installing another one");
        return Ok(false);
    }

    let installed = listen(Arc::downgrade(registry));
    if installed.is_err() {
        INSTALLED.store(false, Ordering::Release);
    }
    installed.map(|()| true)
}

fn listen(registry: Weak<Registry>) -> Result<()> {
    let handle = Handle::try_current()
        .map_err(|e| SupervisorError::Config(format!("interrupt cleanup needs a tokio runtime: {}", e)))?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    handle.spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        info!("Received {}, cleaning up", name);
        if let Some(registry) = registry.upgrade() {
            registry.cleanup();
        }
        std::process::exit(1);
    });
    Ok(())
}
