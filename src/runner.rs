//! Deadline-bounded pipeline runs.
//!
//! A run is spawned as its own task holding a child [`CancellationToken`].
//! While it works, the runner reports a rotating "working" step. When the
//! deadline passes the token is cancelled and the task aborted, so no
//! model call outlives the run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::error::{RagError, RagResult};
use crate::pipeline::{AnswerPipeline, PipelineInput, PipelineOutput};
use crate::progress::{working_step, ProgressEvent, ProgressReporter};

/// Shown to users when a run hits its deadline.
pub const TIMEOUT_MESSAGE: &str = "Error: The research is taking too long. Please try a more specific question or restart the AI system.";

#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    pub timeout: Duration,
    pub step_interval: Duration,
}

impl From<&PipelineConfig> for RunLimits {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            step_interval: Duration::from_secs(config.step_interval_secs),
        }
    }
}

/// A finished run and how long it took.
#[derive(Debug, Clone)]
pub struct TimedOutput {
    pub output: PipelineOutput,
    pub elapsed: Duration,
}

impl TimedOutput {
    /// The answer with its completion-time footer.
    pub fn display_answer(&self) -> String {
        format!("{}{}", self.output.answer, completion_suffix(self.elapsed))
    }
}

pub fn completion_suffix(elapsed: Duration) -> String {
    format!("\n\n_(Completed in {:.2} seconds)_", elapsed.as_secs_f64())
}

/// Run `pipeline` on `input` under `limits`. `parent` cancels the run early
/// (e.g. a client disconnect or Ctrl-C).
pub async fn run_with_deadline(
    pipeline: Arc<AnswerPipeline>,
    input: PipelineInput,
    limits: RunLimits,
    parent: &CancellationToken,
    progress: &dyn ProgressReporter,
) -> RagResult<TimedOutput> {
    let token = parent.child_token();
    let task_token = token.clone();
    let started = Instant::now();

    let mut handle = tokio::spawn(async move { pipeline.run(&input, &task_token).await });

    let deadline = tokio::time::sleep(limits.timeout);
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval(limits.step_interval.max(Duration::from_millis(100)));

    loop {
        tokio::select! {
            joined = &mut handle => {
                let output = joined.map_err(|e| RagError::Pipeline(format!("pipeline task failed: {}", e)))??;
                let elapsed = started.elapsed();
                tracing::info!(elapsed_secs = elapsed.as_secs_f64(), "answer complete");
                return Ok(TimedOutput { output, elapsed });
            }
            _ = ticker.tick() => {
                let elapsed_secs = started.elapsed().as_secs();
                progress.report(ProgressEvent::Working {
                    step: working_step(elapsed_secs, limits.step_interval.as_secs()).to_string(),
                    elapsed_secs,
                });
            }
            _ = &mut deadline => {
                token.cancel();
                handle.abort();
                let _ = handle.await;
                tracing::warn!(timeout_secs = limits.timeout.as_secs(), "answer run timed out");
                return Err(RagError::Timeout(limits.timeout.as_secs()));
            }
        }
    }
}
