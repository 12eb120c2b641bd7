//! Registry of supervised commands and the loop that runs them

mod engine;
mod parallel;
mod registry;
mod run;
mod signals;

pub use parallel::ParallelStart;
pub use registry::{Registry, RegistryBuilder};
pub use run::{RunLines, RunOutput, default_registry, run_capture, run_lines};
