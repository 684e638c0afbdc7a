//! Entry point running units of work through their pipeline

use crate::cancellation::CancellationSignal;
use crate::context::RunContext;
use crate::identity::identify;
use crate::outcome::{BuildSummary, ExecutionReport, ExecutionStatus};
use crate::overlap::OutputOverlapRegistry;
use crate::pipeline::Pipelines;
use crate::work::UnitOfWork;
use crate::workspace::WorkspaceProvisioner;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;
use workcell_cache::{
    BuildCacheController, ExecutionHistoryStore, ExecutionState, FileExecutionHistoryStore,
    LocalBuildCacheController,
};
use workcell_config::ExecutionConfig;
use workcell_core::{Error, Result};
use workcell_utils::tracing::{build_span, work_span};
use workcell_vfs::{Fingerprinter, SnapshotStore};

/// Shared collaborators of every pipeline run, passed in explicitly
pub struct ExecutionServices {
    pub config: ExecutionConfig,
    pub store: Arc<SnapshotStore>,
    pub fingerprinter: Fingerprinter,
    pub history: Arc<dyn ExecutionHistoryStore>,
    pub build_cache: Arc<dyn BuildCacheController>,
    pub provisioner: WorkspaceProvisioner,
    pub overlaps: OutputOverlapRegistry,
}

impl ExecutionServices {
    pub fn new(
        config: ExecutionConfig,
        store: Arc<SnapshotStore>,
        history: Arc<dyn ExecutionHistoryStore>,
        build_cache: Arc<dyn BuildCacheController>,
    ) -> Self {
        let provisioner = WorkspaceProvisioner::new(config.workspace_root());
        let fingerprinter = Fingerprinter::new(store.clone());
        Self {
            config,
            store,
            fingerprinter,
            history,
            build_cache,
            provisioner,
            overlaps: OutputOverlapRegistry::new(),
        }
    }

    /// Services backed by the directories named in `config`
    pub fn from_config(config: ExecutionConfig) -> Self {
        let store = Arc::new(SnapshotStore::from_config(&config));
        let history = Arc::new(FileExecutionHistoryStore::new(config.history_dir()));
        let build_cache = Arc::new(
            LocalBuildCacheController::from_settings(&config.build_cache),
        );
        Self::new(config, store, history, build_cache)
    }

    /// Load the history record of `identity` off the async workers.
    ///
    /// The file-backed store blocks on a cross-process lock per identity.
    pub async fn load_history(&self, identity: &str) -> Result<Option<ExecutionState>> {
        let history = self.history.clone();
        let identity = identity.to_string();
        run_blocking(identity.clone(), move || history.load(&identity)).await
    }

    pub async fn store_history(&self, identity: &str, state: ExecutionState) -> Result<()> {
        let history = self.history.clone();
        let identity = identity.to_string();
        run_blocking(identity.clone(), move || history.store(&identity, &state)).await
    }

    pub async fn remove_history(&self, identity: &str) -> Result<()> {
        let history = self.history.clone();
        let identity = identity.to_string();
        run_blocking(identity.clone(), move || history.remove(&identity)).await
    }
}

async fn run_blocking<T, F>(identity: String, operation: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(operation)
        .await
        .map_err(|e| Error::execution(identity, format!("history task failed: {e}")))?
}

impl std::fmt::Debug for ExecutionServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionServices")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("build_cache_enabled", &self.build_cache.is_enabled())
            .field("provisioner", &self.provisioner)
            .finish()
    }
}

struct EngineInner {
    services: Arc<ExecutionServices>,
    pipelines: Pipelines,
    cancellation: CancellationSignal,
    build_invocation_id: RwLock<String>,
}

/// Runs units of work through the pipeline matching their workspace kind.
///
/// Cloning is cheap; clones share services, build session and cancellation.
#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("build_invocation_id", &*self.inner.build_invocation_id.read())
            .field("services", &self.inner.services)
            .finish()
    }
}

impl ExecutionEngine {
    pub fn new(services: ExecutionServices) -> Self {
        Self::with_pipelines(services, Pipelines::default())
    }

    pub fn with_pipelines(services: ExecutionServices, pipelines: Pipelines) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                services: Arc::new(services),
                pipelines,
                cancellation: CancellationSignal::new(),
                build_invocation_id: RwLock::new(Uuid::new_v4().to_string()),
            }),
        }
    }

    pub fn from_config(config: ExecutionConfig) -> Self {
        Self::new(ExecutionServices::from_config(config))
    }

    pub fn services(&self) -> &ExecutionServices {
        &self.inner.services
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.inner.services.store
    }

    pub fn build_invocation_id(&self) -> String {
        self.inner.build_invocation_id.read().clone()
    }

    /// Begin a build invocation.
    ///
    /// With retention enabled only `changed_paths` are invalidated; otherwise
    /// everything the snapshot store knows is dropped. Returns the new build
    /// invocation id.
    pub fn start_build(&self, changed_paths: &[PathBuf]) -> String {
        let id = Uuid::new_v4().to_string();
        let services = &self.inner.services;
        services
            .store
            .after_build_started(services.config.retention, changed_paths);
        self.inner.cancellation.reset();
        *self.inner.build_invocation_id.write() = id.clone();
        build_span(&id).in_scope(|| {
            tracing::info!(
                retention = ?services.config.retention,
                changed = changed_paths.len(),
                "Build started"
            );
        });
        id
    }

    pub fn finish_build(&self) {
        let services = &self.inner.services;
        services
            .store
            .before_build_finished(services.config.retention);
        tracing::info!(invocation = %self.build_invocation_id(), "Build finished");
    }

    /// Request cancellation of the current build
    pub fn cancel(&self) {
        tracing::info!("Cancellation requested");
        self.inner.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancellation.is_cancelled()
    }

    /// Run one unit of work to completion. Failures are reported, never propagated.
    pub async fn execute(&self, work: Arc<dyn UnitOfWork>) -> ExecutionReport {
        let started = Instant::now();
        let services = self.inner.services.clone();
        let display_name = work.declaration().display_name.clone();

        let identity = match identify(work.as_ref(), &services.fingerprinter) {
            Ok(identity) => identity,
            Err(e) => {
                tracing::error!(work = %display_name, error = %e, "Could not identify work");
                return ExecutionReport {
                    display_name,
                    identity: None,
                    result: Err(e),
                    duration: started.elapsed(),
                    workspace: None,
                };
            }
        };

        let span = work_span(&display_name, &identity.unique_id());
        let pipeline = self
            .inner
            .pipelines
            .for_kind(work.declaration().workspace_kind);
        let mut ctx = RunContext::new(
            services,
            work,
            identity.clone(),
            self.build_invocation_id(),
            self.inner.cancellation.child(),
        );

        let result = pipeline.run(&mut ctx).instrument(span.clone()).await;
        let report = ExecutionReport {
            display_name,
            identity: Some(identity),
            result,
            duration: started.elapsed(),
            workspace: ctx.workspace.as_ref().map(|workspace| workspace.path.clone()),
        };

        span.in_scope(|| match (&report.result, report.status()) {
            (Err(e), ExecutionStatus::Failed) => {
                tracing::error!(error = %e, "Execution failed");
            }
            (_, status) => {
                tracing::info!(
                    status = %status,
                    duration_ms = report.duration.as_millis() as u64,
                    "Finished"
                );
            }
        });
        report
    }

    /// Run independent units of work concurrently, at most `permits` at a time.
    ///
    /// Every unit of work gets its chance; reports come back in submission order.
    pub async fn execute_all(
        &self,
        works: Vec<Arc<dyn UnitOfWork>>,
        permits: usize,
    ) -> BuildSummary {
        let semaphore = Arc::new(Semaphore::new(permits.max(1)));
        let names: Vec<String> = works
            .iter()
            .map(|work| work.declaration().display_name.clone())
            .collect();

        let mut join_set = JoinSet::new();
        for (index, work) in works.into_iter().enumerate() {
            let engine = self.clone();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (index, engine.execute(work).await)
            });
        }

        let mut slots: Vec<Option<ExecutionReport>> = names.iter().map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, report)) => slots[index] = Some(report),
                Err(e) => tracing::error!(error = %e, "Execution task failed"),
            }
        }

        let reports = slots
            .into_iter()
            .zip(names)
            .map(|(slot, display_name)| {
                slot.unwrap_or_else(|| ExecutionReport {
                    result: Err(Error::execution(&display_name, "execution task panicked")),
                    display_name,
                    identity: None,
                    duration: Default::default(),
                    workspace: None,
                })
            })
            .collect();
        BuildSummary { reports }
    }
}
