use super::{Next, Step};
use crate::context::RunContext;
use crate::outcome::ExecutionOutcome;
use async_trait::async_trait;
use workcell_cache::{ExecutionState, OriginMetadata};
use workcell_core::Result;

/// Record what the run saw and produced once the work produced outputs.
///
/// A failed run keeps the previous record but marks it unsuccessful, so the
/// next run neither skips nor trusts the previous state for incremental work.
pub struct StoreExecutionState;

impl StoreExecutionState {
    fn successful_state(ctx: &RunContext, outcome: &ExecutionOutcome) -> Result<ExecutionState> {
        let origin = match outcome {
            ExecutionOutcome::RestoredFromCache { origin } => origin.clone(),
            _ => OriginMetadata::new(
                ctx.build_invocation_id.clone(),
                ctx.execution_time.unwrap_or_default().as_millis() as u64,
            ),
        };
        Ok(ExecutionState {
            successful: true,
            implementation: ctx.implementation,
            value_inputs: ctx
                .value_inputs
                .clone()
                .ok_or_else(|| ctx.missing("value inputs"))?,
            file_inputs: ctx
                .file_inputs
                .clone()
                .ok_or_else(|| ctx.missing("file inputs"))?,
            outputs: ctx
                .outputs_after
                .clone()
                .ok_or_else(|| ctx.missing("outputs after execution"))?,
            origin,
        })
    }
}

#[async_trait]
impl Step for StoreExecutionState {
    fn name(&self) -> &'static str {
        "store-execution-state"
    }

    async fn invoke(&self, ctx: &mut RunContext, next: Next<'_>) -> Result<ExecutionOutcome> {
        let result = next.run(ctx).await;
        let identity = ctx.identity.unique_id();

        match &result {
            Ok(outcome) if outcome.produced_outputs() => {
                let state = Self::successful_state(ctx, outcome)?;
                ctx.services.store_history(&identity, state).await?;
            }
            Ok(_) => {}
            Err(e) if e.is_cancellation() => {}
            Err(_) => {
                if let Some(previous) = ctx.previous.take() {
                    tracing::debug!(work = %ctx.display_name(), "Marking previous execution as failed");
                    if let Err(e) = ctx.services
                        .store_history(&identity, previous.into_failed())
                        .await {
                        tracing::warn!(
                            work = %ctx.display_name(),
                            error = %e,
                            "Could not record failed execution"
                        );
                    }
                }
            }
        }
        result
    }
}
