use crate::generator::GenerationError;
use quickreply_core::types::Reply;
use std::future::Future;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::debug;

pub type GenerationResult = Result<Reply, GenerationError>;

/// Result of racing one generation against the deadline. Produced exactly once
/// per event.
#[derive(Debug)]
pub enum RaceOutcome {
    Completed(GenerationResult),
    /// The deadline fired first. The generation keeps running; its result is
    /// only reachable through the carried [`PendingReply`].
    TimedOut(PendingReply),
}

/// Handle to a generation that lost the race and is still running.
///
/// Dropping it does not cancel the generation, but its result is then lost,
/// so callers consume it with [`PendingReply::wait`].
#[derive(Debug)]
pub struct PendingReply {
    handle: JoinHandle<GenerationResult>,
    started_at: Instant,
}

impl PendingReply {
    pub async fn wait(self) -> GenerationResult {
        let joined = self.handle.await;
        debug!(
            elapsed_ms = self.started_at.elapsed().as_millis() as u64,
            "late generation finished"
        );
        flatten(joined)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Runs reply generation as an independent task and races it against a fixed
/// timer. The task is never aborted: a timeout only decides how the result is
/// reported.
#[derive(Debug, Clone, Copy)]
pub struct DeadlineRace {
    deadline: Duration,
}

impl DeadlineRace {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub async fn run<F>(&self, generation: F) -> RaceOutcome
    where
        F: Future<Output = GenerationResult> + Send + 'static,
    {
        let started_at = Instant::now();
        let mut handle = tokio::spawn(generation);

        tokio::select! {
            // A result that is ready at the deadline still counts as in time.
            biased;
            joined = &mut handle => {
                debug!(
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "generation finished before deadline"
                );
                RaceOutcome::Completed(flatten(joined))
            }
            _ = tokio::time::sleep(self.deadline) => {
                RaceOutcome::TimedOut(PendingReply { handle, started_at })
            }
        }
    }
}

fn flatten(joined: Result<GenerationResult, JoinError>) -> GenerationResult {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(GenerationError::Aborted("generation task panicked".into())),
        Err(e) => Err(GenerationError::Aborted(e.to_string())),
    }
}
