//! The two step pipelines, one per workspace kind

use crate::steps::{
    AssignImmutableWorkspace, AssignMutableWorkspace, BroadcastChangingOutputs, BuildCache,
    CaptureInputs, CaptureOutputsAfter, CaptureOutputsBefore, CreateOutputs,
    DetectOverlappingOutputs, Execute, LoadPreviousExecutionState, MarkInputsFinished, Pipeline,
    RemovePreviousOutputs, RemoveStaleOutputs, ResolveCachingState, ResolveChanges, SkipEmptyWork,
    SkipUpToDate, StoreExecutionState, Timeout, Validate,
};
use crate::work::WorkspaceKind;

/// Work that reuses its workspace in place and may run incrementally
pub fn mutable_pipeline() -> Pipeline {
    Pipeline::builder()
        .step(AssignMutableWorkspace)
        .step(Validate)
        .step(DetectOverlappingOutputs)
        .step(RemoveStaleOutputs)
        .step(LoadPreviousExecutionState)
        .step(CaptureInputs)
        .step(CaptureOutputsBefore)
        .step(ResolveCachingState)
        .step(ResolveChanges)
        .step(SkipUpToDate)
        .step(SkipEmptyWork)
        .step(StoreExecutionState)
        .step(BuildCache)
        .step(RemovePreviousOutputs)
        .step(CaptureOutputsAfter)
        .step(BroadcastChangingOutputs)
        .step(CreateOutputs)
        .step(Timeout::new())
        .step(Execute)
        .build()
}

/// Work whose outputs are content-addressed and written once
pub fn immutable_pipeline() -> Pipeline {
    Pipeline::builder()
        .step(AssignImmutableWorkspace)
        .step(Validate)
        .step(CaptureInputs)
        .step(ResolveCachingState)
        .step(BuildCache)
        .step(MarkInputsFinished)
        .step(CaptureOutputsAfter)
        .step(BroadcastChangingOutputs)
        .step(CreateOutputs)
        .step(Timeout::new())
        .step(Execute)
        .build()
}

/// Both pipelines, selected by workspace kind
#[derive(Debug, Clone)]
pub struct Pipelines {
    mutable: Pipeline,
    immutable: Pipeline,
}

impl Pipelines {
    pub fn new(mutable: Pipeline, immutable: Pipeline) -> Self {
        Self { mutable, immutable }
    }

    pub fn for_kind(&self, kind: WorkspaceKind) -> &Pipeline {
        match kind {
            WorkspaceKind::Mutable => &self.mutable,
            WorkspaceKind::Immutable => &self.immutable,
        }
    }
}

impl Default for Pipelines {
    fn default() -> Self {
        Self::new(mutable_pipeline(), immutable_pipeline())
    }
}
