//! Pipeline steps wrapped around the execution of a unit of work
//!
//! Every step gets the shared [`RunContext`] and a [`Next`] handle for the
//! rest of the pipeline. A step may short-circuit by returning without
//! running `next`, or inspect and adjust the outcome of the steps after it.

mod caching;
mod capture;
mod execute;
mod history;
mod outputs;
mod skip;
mod validate;
mod workspace;

pub use caching::{BuildCache, ResolveCachingState};
pub use capture::{
    CaptureInputs, CaptureOutputsAfter, CaptureOutputsBefore, LoadPreviousExecutionState,
    MarkInputsFinished,
};
pub use execute::{Execute, Timeout};
pub use history::StoreExecutionState;
pub use outputs::{BroadcastChangingOutputs, CreateOutputs, RemovePreviousOutputs};
pub use skip::{ResolveChanges, SkipEmptyWork, SkipUpToDate};
pub use validate::{DetectOverlappingOutputs, Validate};
pub use workspace::{AssignImmutableWorkspace, AssignMutableWorkspace, RemoveStaleOutputs};

pub(crate) use capture::{fingerprint_outputs, output_hashes};

use crate::context::RunContext;
use crate::outcome::ExecutionOutcome;
use async_trait::async_trait;
use std::sync::Arc;
use workcell_core::Result;

/// One concern of the execution pipeline
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &'static str;

    async fn invoke(&self, ctx: &mut RunContext, next: Next<'_>) -> Result<ExecutionOutcome>;
}

/// The remaining steps of a pipeline
#[derive(Clone, Copy)]
pub struct Next<'a> {
    steps: &'a [Arc<dyn Step>],
}

impl<'a> Next<'a> {
    /// Run the next step. Cancellation is checked before every step.
    pub async fn run(self, ctx: &mut RunContext) -> Result<ExecutionOutcome> {
        let Some((step, rest)) = self.steps.split_first() else {
            return Err(ctx.missing("an execution step"));
        };
        ctx.interrupt.check(ctx.display_name())?;
        tracing::trace!(step = step.name(), "Entering step");
        step.invoke(ctx, Next { steps: rest }).await
    }
}

/// An ordered list of steps ending in the step that runs the work
#[derive(Clone, Default)]
pub struct Pipeline {
    steps: Vec<Arc<dyn Step>>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    pub async fn run(&self, ctx: &mut RunContext) -> Result<ExecutionOutcome> {
        Next { steps: &self.steps }.run(ctx).await
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.step_names()).finish()
    }
}

#[derive(Default)]
pub struct PipelineBuilder {
    steps: Vec<Arc<dyn Step>>,
}

impl PipelineBuilder {
    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline { steps: self.steps }
    }
}
