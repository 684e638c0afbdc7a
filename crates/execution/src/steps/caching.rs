use super::{fingerprint_outputs, output_hashes, Next, Step};
use crate::context::{CachingState, RunContext};
use crate::outcome::ExecutionOutcome;
use async_trait::async_trait;
use workcell_cache::{CacheKey, CacheManifest, OriginMetadata, TreeKind};
use workcell_core::{HashCode, Result};
use workcell_utils::delete_recursively;

/// Decide whether the build cache is used and compute the cache key.
///
/// The key covers the implementation, every value and file input, and the
/// names and kinds of the outputs. The display name is not part of it, so
/// equivalent work declared in different places shares entries.
pub struct ResolveCachingState;

impl ResolveCachingState {
    fn resolve(ctx: &RunContext) -> Result<CachingState> {
        let declaration = ctx.declaration();
        let disabled = |reason: &str| {
            Ok(CachingState::Disabled {
                reason: reason.to_string(),
            })
        };
        if !declaration.cacheable {
            return disabled("work is not cacheable");
        }
        if ctx.overlapping {
            return disabled("outputs overlap other work");
        }
        if !ctx.services.build_cache.is_enabled() {
            return disabled("build cache is disabled");
        }

        let mut builder = CacheKey::builder(ctx.implementation);
        let values = ctx
            .value_inputs
            .as_ref()
            .ok_or_else(|| ctx.missing("value inputs"))?;
        for (name, hash) in values {
            builder = builder.value(name, *hash);
        }
        let files = ctx
            .file_inputs
            .as_ref()
            .ok_or_else(|| ctx.missing("file inputs"))?;
        for (name, fingerprint) in files {
            builder = builder.files(name, fingerprint);
        }
        for output in &ctx.outputs {
            let kind = match output.kind {
                TreeKind::File => "file",
                TreeKind::Directory => "directory",
            };
            builder = builder.value(format!("output:{}", output.name), HashCode::of_str(kind));
        }
        Ok(CachingState::Enabled {
            key: builder.build(),
        })
    }
}

#[async_trait]
impl Step for ResolveCachingState {
    fn name(&self) -> &'static str {
        "resolve-caching-state"
    }

    async fn invoke(&self, ctx: &mut RunContext, next: Next<'_>) -> Result<ExecutionOutcome> {
        ctx.caching = Self::resolve(ctx)?;
        match &ctx.caching {
            CachingState::Enabled { key } => {
                tracing::debug!(work = %ctx.display_name(), key = %key, "Caching enabled");
            }
            CachingState::Disabled { reason } => {
                tracing::debug!(work = %ctx.display_name(), reason = %reason, "Caching disabled");
            }
            CachingState::Unresolved => {}
        }
        next.run(ctx).await
    }
}

/// Restore outputs from the build cache, or store them after execution.
///
/// A failing or corrupt entry is never fatal: it is evicted, the partially
/// restored outputs are removed, and the work executes as on a miss.
pub struct BuildCache;

impl BuildCache {
    fn try_load(ctx: &mut RunContext, key: &CacheKey) -> Option<OriginMetadata> {
        let services = ctx.services.clone();
        let roots = ctx.output_roots();

        services.store.invalidate_for_write(&roots);
        let loaded = services.build_cache.load(key, &ctx.outputs);
        services.store.invalidate_for_write(&roots);

        let problem = match loaded {
            Ok(None) => return None,
            Ok(Some(manifest)) => {
                match fingerprint_outputs(&services.fingerprinter, &ctx.outputs) {
                    Ok(fingerprints) if output_hashes(&fingerprints) == manifest.output_hashes => {
                        ctx.outputs_after = Some(fingerprints);
                        return Some(manifest.origin);
                    }
                    Ok(_) => "restored outputs do not match the entry".to_string(),
                    Err(e) => format!("restored outputs could not be fingerprinted: {e}"),
                }
            }
            Err(e) => e.to_string(),
        };

        tracing::warn!(
            work = %ctx.display_name(),
            key = %key,
            problem = %problem,
            "Build cache entry unusable, executing instead"
        );
        if let Err(e) = services.build_cache.evict(key) {
            tracing::warn!(key = %key, error = %e, "Could not evict build cache entry");
        }
        let cleaned = services.store.update(&roots, || {
            for root in &roots {
                delete_recursively(root)?;
            }
            Ok(())
        });
        if let Err(e) = cleaned {
            tracing::warn!(work = %ctx.display_name(), error = %e, "Could not remove restored outputs");
        }
        None
    }

    fn try_store(ctx: &RunContext, key: &CacheKey) {
        let Some(outputs_after) = ctx.outputs_after.as_ref() else {
            return;
        };
        let manifest = CacheManifest {
            origin: OriginMetadata::new(
                ctx.build_invocation_id.clone(),
                ctx.execution_time.unwrap_or_default().as_millis() as u64,
            ),
            output_hashes: output_hashes(outputs_after),
        };
        if let Err(e) = ctx.services.build_cache.store(key, &ctx.outputs, &manifest) {
            tracing::warn!(
                work = %ctx.display_name(),
                key = %key,
                error = %e,
                "Could not store outputs in the build cache"
            );
        }
    }
}

#[async_trait]
impl Step for BuildCache {
    fn name(&self) -> &'static str {
        "build-cache"
    }

    async fn invoke(&self, ctx: &mut RunContext, next: Next<'_>) -> Result<ExecutionOutcome> {
        let Some(key) = ctx.caching.key().copied() else {
            return next.run(ctx).await;
        };

        if let Some(origin) = Self::try_load(ctx, &key) {
            tracing::info!(work = %ctx.display_name(), key = %key, "Restored outputs from the build cache");
            return Ok(ExecutionOutcome::RestoredFromCache { origin });
        }

        let outcome = next.run(ctx).await?;
        if matches!(outcome, ExecutionOutcome::Executed { .. }) {
            Self::try_store(ctx, &key);
        }
        Ok(outcome)
    }
}
