use log::debug;
use rand::random;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::process::{ManagedCommand, RestartHook};

/// Exponential restart delay, usable as an on-restart hook
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Backoff {
    /// Delay before the first restart in milliseconds
    pub initial_delay_ms: u64,

    /// Multiplier applied for every further restart
    pub backoff_factor: f64,

    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,

    /// Whether to add up to 100ms of random jitter
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            backoff_factor: 1.5,
            max_delay_ms: 30_000, // 30 seconds
            jitter: true,
        }
    }
}

impl Backoff {
    pub fn builder() -> BackoffBuilder {
        BackoffBuilder::new()
    }

    /// Delay before restart number `attempt`, counting from 1
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial_delay_ms as f64 * self.backoff_factor.powi(exponent);
        let capped = if scaled.is_finite() {
            (scaled as u64).min(self.max_delay_ms)
        } else {
            self.max_delay_ms
        };

        if self.jitter {
            Duration::from_millis(capped + random::<u64>() % 100)
        } else {
            Duration::from_millis(capped)
        }
    }

    /// On-restart hook driven by the command's restart counter
    pub fn into_hook(self) -> RestartHook {
        Arc::new(move |managed: &ManagedCommand| {
            let delay = self.delay_for(managed.restart_count());
            debug!("{}backing off for {:?}", managed.prefix(), delay);
            delay
        })
    }
}

/// Builder for custom backoff configurations
pub struct BackoffBuilder {
    backoff: Backoff,
}

impl BackoffBuilder {
    pub fn new() -> Self {
        Self {
            backoff: Backoff::default(),
        }
    }

    pub fn initial_delay(mut self, delay_ms: u64) -> Self {
        self.backoff.initial_delay_ms = delay_ms;
        self
    }

    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff.backoff_factor = factor;
        self
    }

    pub fn max_delay(mut self, delay_ms: u64) -> Self {
        self.backoff.max_delay_ms = delay_ms;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.backoff.jitter = jitter;
        self
    }

    pub fn build(self) -> Backoff {
        self.backoff
    }
}

impl Default for BackoffBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{Command, CommandId};

    fn steady() -> Backoff {
        Backoff::builder()
            .initial_delay(100)
            .backoff_factor(2.0)
            .max_delay(1_000)
            .with_jitter(false)
            .build()
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let backoff = steady();
        assert_eq!(backoff.delay_for(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(4), Duration::from_millis(800));
        assert_eq!(backoff.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_under_100ms() {
        let backoff = Backoff::builder().initial_delay(50).max_delay(50).with_jitter(true).build();
        for attempt in 1..20 {
            let delay = backoff.delay_for(attempt);
            assert!(delay >= Duration::from_millis(50));
            assert!(delay < Duration::from_millis(150));
        }
    }

    #[test]
    fn test_hook_reads_restart_count() {
        let hook = steady().into_hook();
        let managed = ManagedCommand::new(CommandId(0), Command::new("true", Vec::<String>::new()));
        managed.bump_restart_count();
        managed.bump_restart_count();
        managed.bump_restart_count();
        assert_eq!(hook(&managed), Duration::from_millis(400));
    }
}
