#![allow(dead_code)]
//! Shared fixtures for pipeline integration tests

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use workcell_config::{ExecutionConfig, ExecutionConfigBuilder};
use workcell_core::{Error, HashCode, Result};
use workcell_execution::{
    ExecutionEngine, ExecutionReport, ExecutionRequest, InputChanges, InputProperty, InputValue,
    NormalizationStrategy, OutputLocation, OutputProperty, TreeKind, UnitOfWork, WorkDeclaration,
    WorkResult, WorkspaceKind,
};

/// Output text produced for one source file
pub fn compiled(content: &[u8]) -> String {
    format!("compiled {}\n", HashCode::of_bytes(content).to_hex())
}

/// Test work that "compiles" every file below its `sources` input.
///
/// File outputs receive the compiled text of all sources; directory outputs
/// receive one `<name>.out` file per source.
pub struct CompileWork {
    declaration: WorkDeclaration,
    executions: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    pub fail: AtomicBool,
    delay: Option<Duration>,
    requests: Mutex<Vec<InputChanges>>,
}

impl CompileWork {
    /// Mutable work compiling `sources` into the file `binary`
    pub fn declaration(name: &str, sources: &Path, binary: &Path) -> WorkDeclaration {
        WorkDeclaration::new(name, WorkspaceKind::Mutable)
            .with_implementation("compile@1")
            .with_input(InputProperty::files(
                "sources",
                [sources],
                NormalizationStrategy::RelativePath,
            ))
            .with_output(OutputProperty::file(
                "binary",
                OutputLocation::Absolute(binary.to_path_buf()),
            ))
    }

    pub fn new(declaration: WorkDeclaration) -> Self {
        Self {
            declaration,
            executions: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<InputChanges> {
        self.requests.lock().unwrap().last().cloned()
    }

    fn sources(&self) -> Vec<PathBuf> {
        self.declaration
            .inputs
            .iter()
            .filter(|input| input.name == "sources")
            .flat_map(|input| match &input.value {
                InputValue::Files { roots, .. } => roots.clone(),
                InputValue::Value(_) => Vec::new(),
            })
            .collect()
    }

    async fn compile(&self, request: &ExecutionRequest) -> Result<WorkResult> {
        let name = self.declaration.display_name.as_str();
        if let Some(delay) = self.delay {
            let deadline = Instant::now() + delay;
            while Instant::now() < deadline {
                if request.interrupt.is_cancelled() {
                    return Err(Error::execution(name, "interrupted"));
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::execution(name, "compilation failed"));
        }

        let mut files = Vec::new();
        for root in self.sources() {
            collect_files(&root, &mut files);
        }
        files.sort();

        for output in &self.declaration.outputs {
            let location = request.output(&output.name).unwrap().to_path_buf();
            match output.kind {
                TreeKind::File => {
                    let text: String = files
                        .iter()
                        .map(|file| compiled(&fs::read(file).unwrap()))
                        .collect();
                    fs::write(&location, text).unwrap();
                }
                TreeKind::Directory => {
                    for file in &files {
                        let target = location.join(format!(
                            "{}.out",
                            file.file_name().unwrap().to_string_lossy()
                        ));
                        fs::write(target, compiled(&fs::read(file).unwrap())).unwrap();
                    }
                }
            }
        }
        Ok(WorkResult::DidWork)
    }
}

fn collect_files(path: &Path, files: &mut Vec<PathBuf>) {
    if path.is_dir() {
        for entry in fs::read_dir(path).unwrap() {
            collect_files(&entry.unwrap().path(), files);
        }
    } else if path.is_file() {
        files.push(path.to_path_buf());
    }
}

#[async_trait]
impl UnitOfWork for CompileWork {
    fn declaration(&self) -> &WorkDeclaration {
        &self.declaration
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<WorkResult> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push(request.input_changes.clone());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let result = self.compile(request).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// An engine whose state lives in a temporary directory
pub struct Fixture {
    pub temp_dir: TempDir,
    pub engine: ExecutionEngine,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with(|builder| builder)
    }

    pub fn with(configure: impl FnOnce(ExecutionConfigBuilder) -> ExecutionConfigBuilder) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config: ExecutionConfig =
            configure(ExecutionConfig::builder().with_state_root(temp_dir.path().join("state")))
                .build();
        Self {
            engine: ExecutionEngine::from_config(config),
            temp_dir,
        }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.temp_dir.path().join(relative)
    }

    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.path(relative)).unwrap()
    }

    /// Run `work` in a build invocation of its own
    pub async fn build(&self, work: &Arc<CompileWork>) -> ExecutionReport {
        self.engine.start_build(&[]);
        let report = self.engine.execute(work.clone()).await;
        self.engine.finish_build();
        report
    }
}
