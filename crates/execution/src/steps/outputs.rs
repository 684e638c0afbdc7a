use super::{Next, Step};
use crate::context::RunContext;
use crate::outcome::ExecutionOutcome;
use async_trait::async_trait;
use std::fs;
use std::io;
use std::path::Path;
use workcell_cache::TreeKind;
use workcell_core::{Error, Result};
use workcell_utils::ensure_parent_dir;

/// Delete one location recorded as a previous output.
///
/// Files are deleted; directories only when they are empty, since anything
/// left inside was not produced by the work.
pub(crate) fn remove_previous_output(path: &Path) -> Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::file_system(path, "read metadata", e)),
    };
    if metadata.is_dir() {
        let _ = fs::remove_dir(path);
        Ok(())
    } else {
        fs::remove_file(path).map_err(|e| Error::file_system(path, "delete previous output", e))
    }
}

/// Delete what the previous execution produced before a full rebuild
pub struct RemovePreviousOutputs;

#[async_trait]
impl Step for RemovePreviousOutputs {
    fn name(&self) -> &'static str {
        "remove-previous-outputs"
    }

    async fn invoke(&self, ctx: &mut RunContext, next: Next<'_>) -> Result<ExecutionOutcome> {
        let incremental = ctx
            .input_changes
            .as_ref()
            .is_some_and(|changes| changes.is_incremental());

        if !incremental && !ctx.overlapping {
            let previous_outputs: Vec<_> = ctx
                .previous
                .iter()
                .flat_map(|previous| previous.outputs.values())
                .flat_map(|fingerprint| fingerprint.existing_paths())
                .collect();
            if !previous_outputs.is_empty() {
                tracing::debug!(
                    work = %ctx.display_name(),
                    count = previous_outputs.len(),
                    "Removing previous outputs before a full rebuild"
                );
                ctx.services.store.update(&previous_outputs, || {
                    previous_outputs
                        .iter()
                        .try_for_each(|path| remove_previous_output(path))
                })?;
            }
        }
        next.run(ctx).await
    }
}

/// Invalidate output locations before and after the work writes them
pub struct BroadcastChangingOutputs;

#[async_trait]
impl Step for BroadcastChangingOutputs {
    fn name(&self) -> &'static str {
        "broadcast-changing-outputs"
    }

    async fn invoke(&self, ctx: &mut RunContext, next: Next<'_>) -> Result<ExecutionOutcome> {
        let roots = ctx.output_roots();
        ctx.services.store.invalidate_for_write(&roots);
        let result = next.run(ctx).await;
        ctx.services.store.invalidate_for_write(&roots);
        result
    }
}

/// Create the parent directories of file outputs and the directory outputs themselves
pub struct CreateOutputs;

#[async_trait]
impl Step for CreateOutputs {
    fn name(&self) -> &'static str {
        "create-outputs"
    }

    async fn invoke(&self, ctx: &mut RunContext, next: Next<'_>) -> Result<ExecutionOutcome> {
        for output in &ctx.outputs {
            match output.kind {
                TreeKind::File => ensure_parent_dir(&output.root)?,
                TreeKind::Directory => fs::create_dir_all(&output.root)
                    .map_err(|e| Error::file_system(&output.root, "create output directory", e))?,
            }
        }
        next.run(ctx).await
    }
}
