use super::outputs::remove_previous_output;
use super::{Next, Step};
use crate::changes::{ChangeDetector, ChangeReport};
use crate::context::RunContext;
use crate::outcome::ExecutionOutcome;
use crate::work::WorkResult;
use async_trait::async_trait;
use std::collections::BTreeSet;
use workcell_core::Result;

/// Compare the captured state with the previous execution
pub struct ResolveChanges;

#[async_trait]
impl Step for ResolveChanges {
    fn name(&self) -> &'static str {
        "resolve-changes"
    }

    async fn invoke(&self, ctx: &mut RunContext, next: Next<'_>) -> Result<ExecutionOutcome> {
        let declaration = ctx.declaration();
        let incremental_properties: BTreeSet<String> = declaration
            .inputs
            .iter()
            .filter(|input| input.incremental)
            .map(|input| input.name.clone())
            .collect();
        // Overlapping outputs may have been written by other work, so their delta means nothing
        let work_incremental = declaration.incremental && !ctx.overlapping;

        let current = ctx.current_state()?;
        let report = ChangeDetector::detect(
            ctx.previous.as_ref(),
            &current,
            &incremental_properties,
            work_incremental,
        );
        let input_changes = report.input_changes(&current);

        match &report {
            ChangeReport::NoHistory => {
                tracing::debug!(work = %ctx.display_name(), "No execution history");
            }
            ChangeReport::UpToDate => {}
            ChangeReport::OutputsChangedExternally { properties } => {
                tracing::info!(
                    work = %ctx.display_name(),
                    properties = ?properties,
                    "Outputs were modified outside the build, executing"
                );
            }
            ChangeReport::InputsChanged { reasons, changes } => {
                tracing::debug!(
                    work = %ctx.display_name(),
                    reasons = ?reasons,
                    incremental = changes.is_incremental(),
                    "Inputs changed"
                );
            }
        }

        ctx.changes = Some(report);
        ctx.input_changes = Some(input_changes);
        next.run(ctx).await
    }
}

/// Skip work whose inputs and outputs match the previous execution
pub struct SkipUpToDate;

#[async_trait]
impl Step for SkipUpToDate {
    fn name(&self) -> &'static str {
        "skip-up-to-date"
    }

    async fn invoke(&self, ctx: &mut RunContext, next: Next<'_>) -> Result<ExecutionOutcome> {
        let up_to_date = ctx.changes.as_ref().is_some_and(ChangeReport::is_up_to_date);
        if up_to_date && ctx.overlapping {
            tracing::debug!(
                work = %ctx.display_name(),
                "Not skipping up-to-date work because its outputs overlap other work"
            );
        } else if up_to_date {
            if let Some(previous) = &ctx.previous {
                tracing::debug!(work = %ctx.display_name(), "Up to date");
                return Ok(ExecutionOutcome::UpToDate {
                    origin: previous.origin.clone(),
                });
            }
        }
        next.run(ctx).await
    }
}

/// Skip work whose skip-when-empty inputs contain no files.
///
/// Outputs of a previous execution are removed, since they were produced
/// from sources that no longer exist. Work with overlapping outputs keeps
/// them.
pub struct SkipEmptyWork;

#[async_trait]
impl Step for SkipEmptyWork {
    fn name(&self) -> &'static str {
        "skip-empty-work"
    }

    async fn invoke(&self, ctx: &mut RunContext, next: Next<'_>) -> Result<ExecutionOutcome> {
        let skip_properties: Vec<String> = ctx
            .declaration()
            .inputs
            .iter()
            .filter(|input| input.skip_when_empty)
            .map(|input| input.name.clone())
            .collect();
        if skip_properties.is_empty() {
            return next.run(ctx).await;
        }

        let file_inputs = ctx
            .file_inputs
            .as_ref()
            .ok_or_else(|| ctx.missing("file inputs"))?;
        let all_empty = skip_properties.iter().all(|name| {
            file_inputs
                .get(name)
                .map_or(true, |fingerprint| fingerprint.contains_no_files())
        });
        if !all_empty {
            return next.run(ctx).await;
        }

        let previous_outputs: Vec<_> = ctx
            .previous
            .iter()
            .flat_map(|previous| previous.outputs.values())
            .flat_map(|fingerprint| fingerprint.existing_paths())
            .collect();

        let identity = ctx.identity.unique_id();
        if let Err(e) = ctx.services.remove_history(&identity).await {
            tracing::warn!(work = %ctx.display_name(), error = %e, "Could not remove execution history");
        }

        if previous_outputs.is_empty() || ctx.overlapping {
            tracing::debug!(work = %ctx.display_name(), "Skipping work without sources");
            return Ok(ExecutionOutcome::SkippedNoSource);
        }

        tracing::info!(
            work = %ctx.display_name(),
            count = previous_outputs.len(),
            "Sources are gone, removing previous outputs"
        );
        ctx.services.store.update(&previous_outputs, || {
            previous_outputs
                .iter()
                .try_for_each(|path| remove_previous_output(path))
        })?;
        Ok(ExecutionOutcome::Executed {
            work_result: WorkResult::DidWork,
            incremental: false,
        })
    }
}
