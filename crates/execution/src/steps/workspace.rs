use super::{fingerprint_outputs, output_hashes, Next, Step};
use crate::context::RunContext;
use crate::identity::immutable_workspace_key;
use crate::outcome::ExecutionOutcome;
use crate::work::{WorkDeclaration, WorkspaceKind};
use crate::workspace::{
    ImmutableWorkspaceMetadata, OutputRecord, PublishOutcome, Workspace, WorkspaceProvisioner,
};
use async_trait::async_trait;
use std::path::Path;
use workcell_cache::{OriginMetadata, OutputTree};
use workcell_core::{Error, Result};
use workcell_utils::delete_recursively;

fn resolve_outputs(declaration: &WorkDeclaration, workspace: &Path) -> Vec<OutputTree> {
    declaration
        .outputs
        .iter()
        .map(|output| OutputTree::new(&output.name, output.resolve(workspace), output.kind))
        .collect()
}

/// Lock the identity's mutable workspace for the rest of the run
pub struct AssignMutableWorkspace;

#[async_trait]
impl Step for AssignMutableWorkspace {
    fn name(&self) -> &'static str {
        "assign-mutable-workspace"
    }

    async fn invoke(&self, ctx: &mut RunContext, next: Next<'_>) -> Result<ExecutionOutcome> {
        let services = ctx.services.clone();
        let lease = services.provisioner.lock_mutable(&ctx.identity).await?;
        let workspace = lease.workspace().clone();
        tracing::debug!(
            work = %ctx.display_name(),
            workspace = %workspace.path.display(),
            "Assigned mutable workspace"
        );
        ctx.outputs = resolve_outputs(ctx.declaration(), &workspace.path);
        ctx.workspace = Some(workspace);

        let result = next.run(ctx).await;
        drop(lease);
        result
    }
}

/// Delete outputs a previous run declared in this workspace that are no longer declared
pub struct RemoveStaleOutputs;

#[async_trait]
impl Step for RemoveStaleOutputs {
    fn name(&self) -> &'static str {
        "remove-stale-outputs"
    }

    async fn invoke(&self, ctx: &mut RunContext, next: Next<'_>) -> Result<ExecutionOutcome> {
        let workspace = ctx.workspace()?.path.clone();
        let current = ctx.output_roots();

        if let Some(previous) = WorkspaceProvisioner::read_output_record(&workspace)? {
            let stale: Vec<_> = previous
                .roots
                .into_iter()
                .filter(|root| !current.contains(root))
                .collect();
            if !stale.is_empty() {
                if ctx.overlapping {
                    tracing::debug!(
                        work = %ctx.display_name(),
                        "Keeping stale outputs because outputs overlap other work"
                    );
                } else {
                    tracing::info!(
                        work = %ctx.display_name(),
                        count = stale.len(),
                        "Removing stale outputs of a differently configured previous run"
                    );
                    ctx.services.store.update(&stale, || {
                        for root in &stale {
                            delete_recursively(root)?;
                        }
                        Ok(())
                    })?;
                }
            }
        }

        WorkspaceProvisioner::write_output_record(&workspace, &OutputRecord { roots: current })?;
        next.run(ctx).await
    }
}

/// Reuse the content-addressed workspace of earlier runs, or produce and publish one
pub struct AssignImmutableWorkspace;

impl AssignImmutableWorkspace {
    /// Check a published workspace against its metadata
    fn check_existing(ctx: &mut RunContext, location: &Path) -> Result<OriginMetadata> {
        let metadata = WorkspaceProvisioner::read_metadata(location)?.ok_or_else(|| {
            Error::workspace_corrupted(location, "workspace has no metadata")
        })?;
        let outputs = resolve_outputs(ctx.declaration(), location);
        ctx.services.store.invalidate(&[location]);
        let fingerprints = fingerprint_outputs(&ctx.services.fingerprinter, &outputs)?;
        if output_hashes(&fingerprints) != metadata.output_hashes {
            return Err(Error::workspace_corrupted(
                location,
                "outputs were modified after the workspace was created",
            ));
        }
        ctx.outputs = outputs;
        ctx.outputs_after = Some(fingerprints);
        ctx.workspace = Some(Workspace {
            kind: WorkspaceKind::Immutable,
            path: location.to_path_buf(),
        });
        Ok(metadata.origin)
    }
}

#[async_trait]
impl Step for AssignImmutableWorkspace {
    fn name(&self) -> &'static str {
        "assign-immutable-workspace"
    }

    async fn invoke(&self, ctx: &mut RunContext, next: Next<'_>) -> Result<ExecutionOutcome> {
        let services = ctx.services.clone();
        let key = immutable_workspace_key(&ctx.identity, &ctx.implementation);
        let location = services.provisioner.immutable_location(&key);

        if location.exists() {
            let origin = Self::check_existing(ctx, &location)?;
            tracing::debug!(
                work = %ctx.display_name(),
                workspace = %location.display(),
                "Reusing immutable workspace"
            );
            return Ok(ExecutionOutcome::UpToDate { origin });
        }

        let staging = services.provisioner.create_staging()?;
        ctx.outputs = resolve_outputs(ctx.declaration(), &staging);
        ctx.workspace = Some(Workspace {
            kind: WorkspaceKind::Immutable,
            path: staging.clone(),
        });

        let result = next.run(ctx).await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                services.store.update(&[&staging], || delete_recursively(&staging))?;
                return Err(e);
            }
        };

        let origin = match &outcome {
            ExecutionOutcome::RestoredFromCache { origin } | ExecutionOutcome::UpToDate { origin } => {
                origin.clone()
            }
            _ => OriginMetadata::new(
                ctx.build_invocation_id.clone(),
                ctx.execution_time.unwrap_or_default().as_millis() as u64,
            ),
        };
        let outputs_after = ctx
            .outputs_after
            .as_ref()
            .ok_or_else(|| ctx.missing("outputs after execution"))?;
        let metadata = ImmutableWorkspaceMetadata {
            origin,
            output_hashes: output_hashes(outputs_after),
        };
        WorkspaceProvisioner::write_metadata(&staging, &metadata)?;

        let published = services.store.update(&[&staging, &location], || {
            services.provisioner.publish(&staging, &location)
        })?;
        match published {
            PublishOutcome::Moved => {
                ctx.outputs = resolve_outputs(ctx.declaration(), &location);
                ctx.workspace = Some(Workspace {
                    kind: WorkspaceKind::Immutable,
                    path: location,
                });
                Ok(outcome)
            }
            PublishOutcome::AlreadyPresent => {
                let origin = Self::check_existing(ctx, &location)?;
                Ok(ExecutionOutcome::UpToDate { origin })
            }
        }
    }
}
