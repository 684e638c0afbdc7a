use super::{Next, Step};
use crate::changes::ChangeDetector;
use crate::context::RunContext;
use crate::identity::hash_value;
use crate::outcome::ExecutionOutcome;
use crate::work::InputValue;
use async_trait::async_trait;
use std::collections::BTreeMap;
use workcell_cache::OutputTree;
use workcell_core::{HashCode, Result};
use workcell_vfs::{FileCollectionFingerprint, Fingerprinter, NormalizationStrategy};

/// Fingerprint every output tree relative to its own root
pub(crate) fn fingerprint_outputs(
    fingerprinter: &Fingerprinter,
    outputs: &[OutputTree],
) -> Result<BTreeMap<String, FileCollectionFingerprint>> {
    outputs
        .iter()
        .map(|tree| {
            fingerprinter
                .fingerprint(&[&tree.root], NormalizationStrategy::RelativePath)
                .map(|fingerprint| (tree.name.clone(), fingerprint))
        })
        .collect()
}

pub(crate) fn output_hashes(
    outputs: &BTreeMap<String, FileCollectionFingerprint>,
) -> BTreeMap<String, HashCode> {
    outputs
        .iter()
        .map(|(name, fingerprint)| (name.clone(), fingerprint.hash()))
        .collect()
}

/// Load the record of the previous execution; an unreadable record counts as no history
pub struct LoadPreviousExecutionState;

#[async_trait]
impl Step for LoadPreviousExecutionState {
    fn name(&self) -> &'static str {
        "load-previous-execution-state"
    }

    async fn invoke(&self, ctx: &mut RunContext, next: Next<'_>) -> Result<ExecutionOutcome> {
        ctx.previous = match ctx.services.load_history(&ctx.identity.unique_id()).await {
            Ok(previous) => previous,
            Err(e) => {
                tracing::warn!(
                    work = %ctx.display_name(),
                    error = %e,
                    "Could not read execution history, executing without it"
                );
                None
            }
        };
        next.run(ctx).await
    }
}

/// Hash value inputs and fingerprint file inputs
pub struct CaptureInputs;

#[async_trait]
impl Step for CaptureInputs {
    fn name(&self) -> &'static str {
        "capture-inputs"
    }

    async fn invoke(&self, ctx: &mut RunContext, next: Next<'_>) -> Result<ExecutionOutcome> {
        let mut value_inputs = BTreeMap::new();
        let mut file_inputs = BTreeMap::new();
        for input in &ctx.declaration().inputs {
            match &input.value {
                InputValue::Value(value) => {
                    value_inputs.insert(input.name.clone(), hash_value(value)?);
                }
                InputValue::Files {
                    roots,
                    normalization,
                } => {
                    let fingerprint = ctx.services.fingerprinter.fingerprint(roots, *normalization)?;
                    file_inputs.insert(input.name.clone(), fingerprint);
                }
            }
        }
        ctx.value_inputs = Some(value_inputs);
        ctx.file_inputs = Some(file_inputs);
        next.run(ctx).await
    }
}

/// Fingerprint the outputs as they are before the work runs
pub struct CaptureOutputsBefore;

#[async_trait]
impl Step for CaptureOutputsBefore {
    fn name(&self) -> &'static str {
        "capture-outputs-before"
    }

    async fn invoke(&self, ctx: &mut RunContext, next: Next<'_>) -> Result<ExecutionOutcome> {
        ctx.outputs_before = Some(fingerprint_outputs(
            &ctx.services.fingerprinter,
            &ctx.outputs,
        )?);
        next.run(ctx).await
    }
}

/// Fingerprint the outputs the work produced
pub struct CaptureOutputsAfter;

#[async_trait]
impl Step for CaptureOutputsAfter {
    fn name(&self) -> &'static str {
        "capture-outputs-after"
    }

    async fn invoke(&self, ctx: &mut RunContext, next: Next<'_>) -> Result<ExecutionOutcome> {
        let outcome = next.run(ctx).await?;
        let roots = ctx.output_roots();
        ctx.services.store.invalidate(&roots);
        ctx.outputs_after = Some(fingerprint_outputs(
            &ctx.services.fingerprinter,
            &ctx.outputs,
        )?);
        Ok(outcome)
    }
}

/// Fix the inputs handed to immutable work and release their fingerprints.
///
/// Immutable work always runs from scratch, so every captured file counts as
/// added. Nothing after this step may consult the input fingerprints again.
pub struct MarkInputsFinished;

#[async_trait]
impl Step for MarkInputsFinished {
    fn name(&self) -> &'static str {
        "mark-inputs-finished"
    }

    async fn invoke(&self, ctx: &mut RunContext, next: Next<'_>) -> Result<ExecutionOutcome> {
        let file_inputs = ctx
            .file_inputs
            .take()
            .ok_or_else(|| ctx.missing("file inputs"))?;
        ctx.input_changes = Some(ChangeDetector::all_added(&file_inputs));
        tracing::debug!(
            work = %ctx.display_name(),
            properties = file_inputs.len(),
            "Inputs finished"
        );
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;
    use workcell_cache::TreeKind;
    use workcell_vfs::SnapshotStore;

    #[test]
    fn test_output_fingerprints_do_not_depend_on_location() {
        let temp_dir = TempDir::new().unwrap();
        let fingerprinter = Fingerprinter::new(Arc::new(SnapshotStore::new()));
        for location in ["staging", "final"] {
            let dir = temp_dir.path().join(location).join("classes");
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("A.class"), "a").unwrap();
        }

        let hashes = |location: &str| {
            output_hashes(
                &fingerprint_outputs(
                    &fingerprinter,
                    &[OutputTree::new(
                        "classes",
                        temp_dir.path().join(location).join("classes"),
                        TreeKind::Directory,
                    )],
                )
                .unwrap(),
            )
        };
        assert_eq!(hashes("staging"), hashes("final"));
    }
}
