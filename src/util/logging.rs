use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;

use crate::config::LogLevel;

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

fn builder(level: LogLevel) -> Builder {
    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, level.into())
        .parse_default_env();
    builder
}

/// Initialize the logging system; `RUST_LOG` refines `level`.
///
/// Panics if a logger is already installed, use [`try_init`] otherwise.
pub fn init(level: LogLevel) {
    builder(level).init();
}

/// Initialize the logging system unless a logger is already installed
pub fn try_init(level: LogLevel) -> bool {
    builder(level).try_init().is_ok()
}
