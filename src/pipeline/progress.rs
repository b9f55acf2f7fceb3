use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::BuildError;

/// Where a build run currently is.
///
/// `Idle → Preparing → Converting(i/N) → Assembling → Compiling → Succeeded | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStage {
    Idle,
    Preparing,
    Converting { done: usize, total: usize },
    Assembling,
    Compiling,
    Succeeded,
    Failed,
}

impl BuildStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Converting { .. } => "converting",
            Self::Assembling => "assembling",
            Self::Compiling => "compiling",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for BuildStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Converting { done, total } => write!(f, "converting ({}/{})", done, total),
            other => f.write_str(other.as_str()),
        }
    }
}

/// The compiled output of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub path: PathBuf,
    pub chapters: usize,
    pub finished_at: DateTime<Utc>,
}

/// Everything a run reports. Each run sends any number of `Progress` events
/// followed by exactly one of `Succeeded` or `Failed`.
#[derive(Debug)]
pub enum BuildEvent {
    Progress { stage: BuildStage, fraction: f32 },
    Succeeded(BuildArtifact),
    Failed(BuildError),
}

/// Sends progress for one run, never letting the fraction go backwards.
pub(crate) struct ProgressReporter {
    tx: mpsc::UnboundedSender<BuildEvent>,
    last: f32,
}

impl ProgressReporter {
    pub(crate) fn new(tx: mpsc::UnboundedSender<BuildEvent>) -> Self {
        Self { tx, last: 0.0 }
    }

    pub(crate) fn report(&mut self, stage: BuildStage, fraction: f32) {
        let fraction = fraction.clamp(0.0, 1.0).max(self.last);
        self.last = fraction;
        tracing::debug!(stage = %stage, fraction, "Build progress");
        // The receiver may have been dropped; the run continues regardless.
        let _ = self.tx.send(BuildEvent::Progress { stage, fraction });
    }

    pub(crate) fn last(&self) -> f32 {
        self.last
    }

    pub(crate) fn finish(mut self, outcome: Result<BuildArtifact, BuildError>) {
        match outcome {
            Ok(artifact) => {
                self.report(BuildStage::Succeeded, 1.0);
                let _ = self.tx.send(BuildEvent::Succeeded(artifact));
            }
            Err(error) => {
                let last = self.last();
                self.report(BuildStage::Failed, last);
                let _ = self.tx.send(BuildEvent::Failed(error));
            }
        }
    }
}

/// Caller-side handle to a run started by [`Pipeline::run_async`](super::Pipeline::run_async).
///
/// Events are consumed on the caller's own task: poll [`try_next_event`](Self::try_next_event)
/// from an event loop, `await` [`next_event`](Self::next_event), or hand the
/// handle to [`dispatch`](Self::dispatch).
#[derive(Debug)]
pub struct BuildHandle {
    id: u64,
    events: mpsc::UnboundedReceiver<BuildEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl BuildHandle {
    pub(crate) fn new(
        id: u64,
        events: mpsc::UnboundedReceiver<BuildEvent>,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            id,
            events,
            cancel,
            task,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Request cancellation. The run still reports `Failed(Cancelled)`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn next_event(&mut self) -> Option<BuildEvent> {
        self.events.recv().await
    }

    /// Non-blocking poll for a caller that owns its own loop.
    pub fn try_next_event(&mut self) -> Option<BuildEvent> {
        self.events.try_recv().ok()
    }

    /// Wait for the terminal event, discarding progress.
    pub async fn wait(mut self) -> Result<BuildArtifact, BuildError> {
        while let Some(event) = self.events.recv().await {
            match event {
                BuildEvent::Progress { .. } => {}
                BuildEvent::Succeeded(artifact) => return Ok(artifact),
                BuildEvent::Failed(error) => return Err(error),
            }
        }
        Err(worker_vanished())
    }

    /// Drive the run to completion on the current task, invoking `on_progress`
    /// for each progress event and exactly one of `on_success` / `on_error`.
    pub async fn dispatch(
        mut self,
        mut on_progress: impl FnMut(BuildStage, f32),
        on_success: impl FnOnce(BuildArtifact),
        on_error: impl FnOnce(BuildError),
    ) {
        while let Some(event) = self.events.recv().await {
            match event {
                BuildEvent::Progress { stage, fraction } => on_progress(stage, fraction),
                BuildEvent::Succeeded(artifact) => return on_success(artifact),
                BuildEvent::Failed(error) => return on_error(error),
            }
        }
        on_error(worker_vanished());
    }
}

fn worker_vanished() -> BuildError {
    BuildError::Io(std::io::Error::other("build task ended without reporting a result"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reporter_never_goes_backwards() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reporter = ProgressReporter::new(tx);
        reporter.report(BuildStage::Compiling, 0.7);
        reporter.report(BuildStage::Assembling, 0.6);

        let fractions: Vec<f32> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                BuildEvent::Progress { fraction, .. } => Some(fraction),
                _ => None,
            })
            .collect();
        assert_eq!(fractions, vec![0.7, 0.7]);
    }

    #[test]
    fn stage_display_includes_counts() {
        assert_eq!(BuildStage::Converting { done: 2, total: 5 }.to_string(), "converting (2/5)");
        assert_eq!(BuildStage::Compiling.to_string(), "compiling");
    }
}
