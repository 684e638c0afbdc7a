use super::{Next, Step};
use crate::context::RunContext;
use crate::outcome::ExecutionOutcome;
use crate::work::{InputValue, OutputLocation, WorkDeclaration, WorkspaceKind};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Component, Path};
use workcell_core::{Error, Result};

/// Reject declarations the pipeline cannot handle, naming the offending property
pub struct Validate;

impl Validate {
    pub fn check(declaration: &WorkDeclaration) -> Result<()> {
        let work = declaration.display_name.as_str();
        let invalid = |property: &str, message: &str| Error::validation(work, property, message);

        let mut names = BTreeSet::new();
        for name in declaration
            .inputs
            .iter()
            .map(|input| &input.name)
            .chain(declaration.outputs.iter().map(|output| &output.name))
        {
            if name.is_empty() {
                return Err(invalid(name, "property names must not be empty"));
            }
            if !names.insert(name.as_str()) {
                return Err(invalid(name, "property is declared more than once"));
            }
        }

        for input in &declaration.inputs {
            match &input.value {
                InputValue::Files { roots, .. } => {
                    if let Some(root) = roots.iter().find(|root| !root.is_absolute()) {
                        return Err(invalid(
                            &input.name,
                            &format!("input location {} is not absolute", root.display()),
                        ));
                    }
                }
                InputValue::Value(_) => {
                    if input.incremental || input.skip_when_empty {
                        return Err(invalid(
                            &input.name,
                            "only file inputs can be incremental or skipped when empty",
                        ));
                    }
                }
            }
        }

        for output in &declaration.outputs {
            // Output names become archive path segments in build cache entries
            if output.name.contains(['/', '\\']) {
                return Err(invalid(
                    &output.name,
                    "output property names must not contain path separators",
                ));
            }
            match &output.location {
                OutputLocation::Absolute(path) => {
                    if declaration.workspace_kind == WorkspaceKind::Immutable {
                        return Err(invalid(
                            &output.name,
                            "immutable work can only declare outputs inside its workspace",
                        ));
                    }
                    if !path.is_absolute() {
                        return Err(invalid(
                            &output.name,
                            &format!("output location {} is not absolute", path.display()),
                        ));
                    }
                }
                OutputLocation::WorkspaceRelative(path) => {
                    if !is_plain_relative(path) {
                        return Err(invalid(
                            &output.name,
                            &format!(
                                "workspace output {} must be a relative path inside the workspace",
                                path.display()
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

fn is_plain_relative(path: &Path) -> bool {
    path.components().next().is_some()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}

#[async_trait]
impl Step for Validate {
    fn name(&self) -> &'static str {
        "validate"
    }

    async fn invoke(&self, ctx: &mut RunContext, next: Next<'_>) -> Result<ExecutionOutcome> {
        Self::check(ctx.declaration())?;
        next.run(ctx).await
    }
}

/// Claim the output locations and flag work whose outputs overlap other work
pub struct DetectOverlappingOutputs;

#[async_trait]
impl Step for DetectOverlappingOutputs {
    fn name(&self) -> &'static str {
        "detect-overlapping-outputs"
    }

    async fn invoke(&self, ctx: &mut RunContext, next: Next<'_>) -> Result<ExecutionOutcome> {
        let roots = ctx.output_roots();
        ctx.overlapping = ctx.services.overlaps.register(
            &ctx.identity.unique_id(),
            ctx.display_name(),
            &roots,
        );
        next.run(ctx).await
    }
}
