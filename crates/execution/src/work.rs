//! Units of work and their declared inputs and outputs

use crate::cancellation::CancellationSignal;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use workcell_cache::TreeKind;
use workcell_core::Result;
use workcell_vfs::{ChangeType, FileChange, NormalizationStrategy};

/// Lifecycle of the directory a unit of work runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkspaceKind {
    /// Identity-scoped and reused in place; supports incremental execution
    Mutable,
    /// Content-addressed and write-once
    Immutable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    /// Any serializable value; only its canonical JSON form matters
    Value(serde_json::Value),
    Files {
        roots: Vec<PathBuf>,
        normalization: NormalizationStrategy,
    },
}

/// One named input property
#[derive(Debug, Clone, PartialEq)]
pub struct InputProperty {
    pub name: String,
    pub value: InputValue,
    /// Participates in the identity of the work
    pub identity: bool,
    /// Changes of this file property are handed to the work
    pub incremental: bool,
    /// The work has nothing to do when this file property is empty
    pub skip_when_empty: bool,
}

impl InputProperty {
    pub fn value(name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            value: InputValue::Value(value),
            identity: false,
            incremental: false,
            skip_when_empty: false,
        }
    }

    pub fn files<P: Into<PathBuf>>(
        name: impl Into<String>,
        roots: impl IntoIterator<Item = P>,
        normalization: NormalizationStrategy,
    ) -> Self {
        Self {
            name: name.into(),
            value: InputValue::Files {
                roots: roots.into_iter().map(Into::into).collect(),
                normalization,
            },
            identity: false,
            incremental: false,
            skip_when_empty: false,
        }
    }

    pub fn identity(mut self) -> Self {
        self.identity = true;
        self
    }

    pub fn incremental(mut self) -> Self {
        self.incremental = true;
        self
    }

    pub fn skip_when_empty(mut self) -> Self {
        self.skip_when_empty = true;
        self
    }

    pub fn is_files(&self) -> bool {
        matches!(self.value, InputValue::Files { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLocation {
    Absolute(PathBuf),
    /// Resolved against the workspace assigned to the run
    WorkspaceRelative(PathBuf),
}

/// One named output property
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputProperty {
    pub name: String,
    pub location: OutputLocation,
    pub kind: TreeKind,
}

impl OutputProperty {
    pub fn file(name: impl Into<String>, location: OutputLocation) -> Self {
        Self {
            name: name.into(),
            location,
            kind: TreeKind::File,
        }
    }

    pub fn directory(name: impl Into<String>, location: OutputLocation) -> Self {
        Self {
            name: name.into(),
            location,
            kind: TreeKind::Directory,
        }
    }

    pub fn resolve(&self, workspace: &Path) -> PathBuf {
        match &self.location {
            OutputLocation::Absolute(path) => path.clone(),
            OutputLocation::WorkspaceRelative(path) => workspace.join(path),
        }
    }
}

/// Everything the pipeline needs to know about a unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct WorkDeclaration {
    pub display_name: String,
    pub workspace_kind: WorkspaceKind,
    /// Identifies the code that runs; a change invalidates history and cache keys
    pub implementation: String,
    pub inputs: Vec<InputProperty>,
    pub outputs: Vec<OutputProperty>,
    pub cacheable: bool,
    /// Whether the work can process only the changed inputs
    pub incremental: bool,
    pub timeout: Option<Duration>,
}

impl WorkDeclaration {
    pub fn new(display_name: impl Into<String>, workspace_kind: WorkspaceKind) -> Self {
        let display_name = display_name.into();
        Self {
            implementation: display_name.clone(),
            display_name,
            workspace_kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            cacheable: false,
            incremental: false,
            timeout: None,
        }
    }

    pub fn with_implementation(mut self, implementation: impl Into<String>) -> Self {
        self.implementation = implementation.into();
        self
    }

    pub fn with_input(mut self, input: InputProperty) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_output(mut self, output: OutputProperty) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn with_cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn with_incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Per-property file changes handed to an executing unit of work.
///
/// For a non-incremental execution every current entry is reported as added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputChanges {
    incremental: bool,
    changes: BTreeMap<String, Vec<FileChange>>,
}

impl InputChanges {
    pub fn new(incremental: bool, changes: BTreeMap<String, Vec<FileChange>>) -> Self {
        Self {
            incremental,
            changes,
        }
    }

    pub fn is_incremental(&self) -> bool {
        self.incremental
    }

    pub fn changes_for(&self, property: &str) -> &[FileChange] {
        self.changes.get(property).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn added(&self, property: &str) -> impl Iterator<Item = &FileChange> {
        self.changes_for(property)
            .iter()
            .filter(|change| change.change == ChangeType::Added)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.values().all(Vec::is_empty)
    }
}

/// What the pipeline hands to [`UnitOfWork::execute`]
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub workspace: PathBuf,
    /// Resolved output locations by property name
    pub outputs: BTreeMap<String, PathBuf>,
    pub input_changes: InputChanges,
    /// Set when the run times out or the build is cancelled
    pub interrupt: CancellationSignal,
}

impl ExecutionRequest {
    pub fn output(&self, property: &str) -> Option<&Path> {
        self.outputs.get(property).map(PathBuf::as_path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkResult {
    DidWork,
    /// The work inspected its inputs and found nothing to do
    DidNoWork,
}

/// A schedulable, cacheable piece of build work
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    fn declaration(&self) -> &WorkDeclaration;

    async fn execute(&self, request: &ExecutionRequest) -> Result<WorkResult>;
}
