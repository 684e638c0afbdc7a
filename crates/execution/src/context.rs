//! Mutable state threaded through the steps of one pipeline run

use crate::cancellation::CancellationSignal;
use crate::changes::{ChangeReport, CurrentState};
use crate::engine::ExecutionServices;
use crate::identity::WorkIdentity;
use crate::work::{InputChanges, UnitOfWork, WorkDeclaration};
use crate::workspace::Workspace;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use workcell_cache::{CacheKey, ExecutionState, OutputTree};
use workcell_core::{Error, HashCode, Result};
use workcell_vfs::FileCollectionFingerprint;

/// Whether the build cache takes part in this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachingState {
    /// Not resolved yet
    Unresolved,
    Disabled { reason: String },
    Enabled { key: CacheKey },
}

impl CachingState {
    pub fn key(&self) -> Option<&CacheKey> {
        match self {
            CachingState::Enabled { key } => Some(key),
            _ => None,
        }
    }
}

/// Everything the steps learn about one unit of work while it runs.
///
/// Later steps read what earlier steps captured; a missing capture is a
/// programming error in the pipeline and reported as such.
pub struct RunContext {
    pub services: Arc<ExecutionServices>,
    pub work: Arc<dyn UnitOfWork>,
    pub identity: WorkIdentity,
    pub build_invocation_id: String,
    /// Set when the run is interrupted or the build is cancelled
    pub interrupt: CancellationSignal,

    pub workspace: Option<Workspace>,
    pub outputs: Vec<OutputTree>,
    /// Outputs of this work overlap outputs of other work
    pub overlapping: bool,

    pub previous: Option<ExecutionState>,
    pub implementation: HashCode,
    pub value_inputs: Option<BTreeMap<String, HashCode>>,
    pub file_inputs: Option<BTreeMap<String, FileCollectionFingerprint>>,
    pub outputs_before: Option<BTreeMap<String, FileCollectionFingerprint>>,
    pub outputs_after: Option<BTreeMap<String, FileCollectionFingerprint>>,

    pub caching: CachingState,
    pub changes: Option<ChangeReport>,
    pub input_changes: Option<InputChanges>,
    pub execution_time: Option<Duration>,
}

impl RunContext {
    pub fn new(
        services: Arc<ExecutionServices>,
        work: Arc<dyn UnitOfWork>,
        identity: WorkIdentity,
        build_invocation_id: String,
        interrupt: CancellationSignal,
    ) -> Self {
        let implementation = HashCode::of_str(&work.declaration().implementation);
        Self {
            services,
            work,
            identity,
            build_invocation_id,
            interrupt,
            workspace: None,
            outputs: Vec::new(),
            overlapping: false,
            previous: None,
            implementation,
            value_inputs: None,
            file_inputs: None,
            outputs_before: None,
            outputs_after: None,
            caching: CachingState::Unresolved,
            changes: None,
            input_changes: None,
            execution_time: None,
        }
    }

    pub fn declaration(&self) -> &WorkDeclaration {
        self.work.declaration()
    }

    pub fn display_name(&self) -> &str {
        &self.declaration().display_name
    }

    pub fn workspace(&self) -> Result<&Workspace> {
        self.workspace
            .as_ref()
            .ok_or_else(|| self.missing("workspace"))
    }

    pub fn output_roots(&self) -> Vec<PathBuf> {
        self.outputs.iter().map(|tree| tree.root.clone()).collect()
    }

    /// State captured so far, for change detection
    pub fn current_state(&self) -> Result<CurrentState<'_>> {
        Ok(CurrentState {
            implementation: &self.implementation,
            value_inputs: self
                .value_inputs
                .as_ref()
                .ok_or_else(|| self.missing("value inputs"))?,
            file_inputs: self
                .file_inputs
                .as_ref()
                .ok_or_else(|| self.missing("file inputs"))?,
            outputs: self
                .outputs_before
                .as_ref()
                .ok_or_else(|| self.missing("outputs before execution"))?,
        })
    }

    pub fn missing(&self, what: &str) -> Error {
        Error::execution(
            self.display_name(),
            format!("{what} not captured before it was needed"),
        )
    }
}
