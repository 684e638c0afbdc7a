use super::{Next, Step};
use crate::changes::ChangeDetector;
use crate::context::RunContext;
use crate::outcome::ExecutionOutcome;
use crate::work::{ExecutionRequest, InputChanges};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use workcell_core::{Error, Result};

/// Time given to interrupted work to wind down before it is abandoned
const INTERRUPT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Interrupt the work once its deadline elapses.
///
/// The work is asked to stop through its interrupt signal and given a grace
/// period; the run then fails with a timeout either way.
pub struct Timeout {
    grace_period: Duration,
}

impl Timeout {
    pub fn new() -> Self {
        Self {
            grace_period: INTERRUPT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(grace_period: Duration) -> Self {
        Self { grace_period }
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Step for Timeout {
    fn name(&self) -> &'static str {
        "timeout"
    }

    async fn invoke(&self, ctx: &mut RunContext, next: Next<'_>) -> Result<ExecutionOutcome> {
        let timeout = ctx
            .declaration()
            .timeout
            .or_else(|| ctx.services.config.default_timeout());
        let Some(timeout) = timeout else {
            return next.run(ctx).await;
        };

        let display_name = ctx.display_name().to_string();
        let interrupt = ctx.interrupt.clone();
        let run = next.run(ctx);
        tokio::pin!(run);

        tokio::select! {
            result = &mut run => result,
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(work = %display_name, timeout = ?timeout, "Timed out, interrupting");
                interrupt.cancel();
                if tokio::time::timeout(self.grace_period, &mut run).await.is_err() {
                    tracing::warn!(work = %display_name, "Work did not stop within the grace period");
                }
                Err(Error::timeout(display_name, timeout))
            }
        }
    }
}

/// Invoke the unit of work
pub struct Execute;

#[async_trait]
impl Step for Execute {
    fn name(&self) -> &'static str {
        "execute"
    }

    async fn invoke(&self, ctx: &mut RunContext, _next: Next<'_>) -> Result<ExecutionOutcome> {
        let workspace = ctx.workspace()?.path.clone();
        let input_changes = match (&ctx.input_changes, &ctx.file_inputs) {
            (Some(changes), _) => changes.clone(),
            (None, Some(file_inputs)) => ChangeDetector::all_added(file_inputs),
            (None, None) => InputChanges::default(),
        };
        let incremental = input_changes.is_incremental();
        let request = ExecutionRequest {
            workspace,
            outputs: ctx
                .outputs
                .iter()
                .map(|tree| (tree.name.clone(), tree.root.clone()))
                .collect(),
            input_changes,
            interrupt: ctx.interrupt.clone(),
        };

        tracing::info!(work = %ctx.display_name(), incremental, "Executing");
        let started = Instant::now();
        let work = ctx.work.clone();
        let result = work.execute(&request).await;
        ctx.execution_time = Some(started.elapsed());

        match result {
            Ok(work_result) => Ok(ExecutionOutcome::Executed {
                work_result,
                incremental,
            }),
            Err(_) if ctx.interrupt.is_cancelled() => Err(Error::cancelled(ctx.display_name())),
            Err(e) => Err(e),
        }
    }
}
