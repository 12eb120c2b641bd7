use tokio::task::JoinHandle;

use crate::error::Result;
use crate::process::CommandId;

/// Supervision runs launched together by [`Registry::start_all_parallel`].
///
/// Each run resolves exactly once, when its command is back in `NotStarted`.
/// Dropping the handle detaches the runs; they keep going in the background.
///
/// [`Registry::start_all_parallel`]: super::Registry::start_all_parallel
#[derive(Debug, Default)]
pub struct ParallelStart {
    runs: Vec<(CommandId, JoinHandle<Result<()>>)>,
}

impl ParallelStart {
    pub(crate) fn push(&mut self, id: CommandId, run: JoinHandle<Result<()>>) {
        self.runs.push((id, run));
    }

    /// Ids of the launched commands, in registration order
    pub fn ids(&self) -> impl Iterator<Item = CommandId> + '_ {
        self.runs.iter().map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Wait for every run and collect their outcomes
    pub async fn wait(self) -> Vec<(CommandId, Result<()>)> {
        let mut outcomes = Vec::with_capacity(self.runs.len());
        for (id, run) in self.runs {
            let outcome = match run.await {
                Ok(outcome) => outcome,
                Err(e) => Err(e.into()),
            };
            outcomes.push((id, outcome));
        }
        outcomes
    }
}
