//! Incremental execution of units of work
//!
//! A [`UnitOfWork`] declares its inputs and outputs. The [`ExecutionEngine`]
//! identifies it, then runs it through one of two step pipelines depending
//! on its [`WorkspaceKind`]:
//!
//! - mutable work reuses an identity-scoped workspace, is skipped when
//!   nothing changed since its recorded execution, and may run incrementally
//! - immutable work runs once into a staging directory that is published to a
//!   content-addressed location and reused from then on
//!
//! Both pipelines restore outputs from the build cache when possible.

pub mod cancellation;
pub mod changes;
pub mod context;
pub mod engine;
pub mod identity;
pub mod outcome;
pub mod overlap;
pub mod pipeline;
pub mod steps;
pub mod work;
pub mod workspace;

pub use cancellation::CancellationSignal;
pub use changes::{ChangeDetector, ChangeReport, CurrentState};
pub use context::{CachingState, RunContext};
pub use engine::{ExecutionEngine, ExecutionServices};
pub use identity::{identify, WorkIdentity};
pub use outcome::{BuildSummary, ExecutionOutcome, ExecutionReport, ExecutionStatus};
pub use overlap::OutputOverlapRegistry;
pub use pipeline::{immutable_pipeline, mutable_pipeline, Pipelines};
pub use steps::{Next, Pipeline, PipelineBuilder, Step};
pub use work::{
    ExecutionRequest, InputChanges, InputProperty, InputValue, OutputLocation, OutputProperty,
    UnitOfWork, WorkDeclaration, WorkResult, WorkspaceKind,
};
pub use workspace::{Workspace, WorkspaceProvisioner};

pub use workcell_cache::TreeKind;
pub use workcell_vfs::{ChangeType, FileChange, NormalizationStrategy};
