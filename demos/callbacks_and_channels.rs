// Hook-based and queue-based delivery side by side

use anyhow::Result;
use log::info;
use procwarden::backoff::Backoff;
use procwarden::config::LogLevel;
use procwarden::prelude::*;
use procwarden::util::logging;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(LogLevel::Info);

    let registry = Registry::builder()
        .error_observer(Arc::new(LogErrors))
        .cleanup_on_signal(true)
        .build()?;

    // Callbacks: count lines and back off between restarts
    let lines = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&lines);
    let hooked = registry.register(
        Command::builder("sh")
            .args(["-c", "echo tick; sleep 0.2; echo tock >&2; exit 1"])
            .label("hooked")
            .restart(RestartPolicy::Times(3))
            .hide_stdout(true)
            .on_stdout(move |cmd, line| {
                counter.fetch_add(1, Ordering::Relaxed);
                info!("{}stdout hook got {:?} (restart {})", cmd.prefix(), line, cmd.restart_count());
                Ok(())
            })
            .restart_hook(
                Backoff::builder()
                    .initial_delay(100)
                    .backoff_factor(2.0)
                    .max_delay(1_000)
                    .with_jitter(false)
                    .build()
                    .into_hook(),
            )
            .on_state_changed(|cmd, old, new| info!("{}{} -> {}", cmd.prefix(), old, new))
            .build(),
    )?;

    // Channels: consume the same kind of information from queues
    let queued = registry.register(
        Command::builder("sh")
            .args(["-c", "for i in 1 2 3; do echo line $i; sleep 0.1; done"])
            .label("queued")
            .hide_stdout(true)
            .queues(4, 4)
            .build(),
    )?;
    let mut events = registry.take_events(queued)?;
    let consumer = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(line) = events.stdout.next() => info!("queued: stdout queue got {:?}", line),
                Some(line) = events.stderr.next() => info!("queued: stderr queue got {:?}", line),
                Some(state) = events.state.recv() => info!("queued: state queue got {}", state),
                Some(elapsed) = events.completed.recv() => info!("queued: attempt took {:?}", elapsed),
                Some(()) = events.exit.recv() => {
                    while let Some(line) = events.stdout.try_next() {
                        info!("queued: stdout queue got {:?}", line);
                    }
                    break;
                }
                else => break,
            }
        }
    });

    for (id, outcome) in registry.start_all_parallel()?.wait().await {
        info!("{} finished: {:?}", registry.command_string(id), outcome);
    }
    consumer.await?;

    info!("hooked command printed {} stdout lines", lines.load(Ordering::Relaxed));
    info!("final states: {} / {}", registry.state(hooked)?, registry.state(queued)?);
    Ok(())
}
