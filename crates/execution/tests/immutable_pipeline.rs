mod common;

use common::{compiled, CompileWork, Fixture};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use workcell_core::Error;
use workcell_execution::{
    ChangeType, ExecutionStatus, InputProperty, NormalizationStrategy, OutputLocation,
    OutputProperty, WorkDeclaration, WorkspaceKind,
};

fn transform(sources: &Path) -> WorkDeclaration {
    WorkDeclaration::new(":transform", WorkspaceKind::Immutable)
        .with_implementation("compile@1")
        .with_input(
            InputProperty::files("sources", [sources], NormalizationStrategy::RelativePath)
                .identity(),
        )
        .with_output(OutputProperty::directory(
            "classes",
            OutputLocation::WorkspaceRelative("classes".into()),
        ))
}

#[tokio::test]
async fn test_immutable_workspace_is_created_once_and_reused() {
    let fixture = Fixture::new();
    let sources = fixture.path("src");
    fixture.write("src/A.src", "a");
    let work = Arc::new(CompileWork::new(transform(&sources)));

    let first = fixture.build(&work).await;
    assert_eq!(first.status(), ExecutionStatus::Executed);
    let workspace = first.workspace.clone().unwrap();
    assert!(workspace.starts_with(fixture.path("state/workspaces/immutable")));
    assert_eq!(
        fs::read_to_string(workspace.join("classes/A.src.out")).unwrap(),
        compiled(b"a")
    );

    let second = fixture.build(&work).await;
    assert_eq!(second.status(), ExecutionStatus::UpToDate);
    assert_eq!(second.workspace, Some(workspace));
    assert_eq!(work.executions(), 1);

    // Different identity inputs get a workspace of their own
    fixture.write("src/A.src", "changed");
    let third = fixture.build(&work).await;
    assert_eq!(third.status(), ExecutionStatus::Executed);
    assert_ne!(third.workspace, first.workspace);

    // Immutable work always starts from scratch, so its sources are all new
    let changes = work.last_request().unwrap();
    let delta = changes.changes_for("sources");
    assert!(delta.iter().all(|change| change.change == ChangeType::Added));
    assert!(delta.iter().any(|change| change.normalized_path == "A.src"));
}

#[tokio::test]
async fn test_modified_immutable_workspace_is_reported_corrupt() {
    let fixture = Fixture::new();
    let sources = fixture.path("src");
    fixture.write("src/A.src", "a");
    let work = Arc::new(CompileWork::new(transform(&sources)));

    let first = fixture.build(&work).await;
    let workspace = first.workspace.unwrap();
    fs::write(workspace.join("classes/extra.out"), "stray").unwrap();

    let report = fixture.build(&work).await;
    assert_eq!(report.status(), ExecutionStatus::Failed);
    assert!(matches!(
        report.error(),
        Some(Error::WorkspaceCorrupted { .. })
    ));
    assert_eq!(work.executions(), 1);
}

#[tokio::test]
async fn test_failed_immutable_work_leaves_no_workspace_behind() {
    let fixture = Fixture::new();
    let sources = fixture.path("src");
    fixture.write("src/A.src", "a");
    let work = Arc::new(CompileWork::new(transform(&sources)));
    work.fail.store(true, std::sync::atomic::Ordering::SeqCst);

    let report = fixture.build(&work).await;
    assert_eq!(report.status(), ExecutionStatus::Failed);
    let leftovers: Vec<_> = fs::read_dir(fixture.path("state/workspaces/immutable"))
        .unwrap()
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_producers_publish_one_workspace() {
    let fixture = Fixture::new();
    let sources = fixture.path("src");
    fixture.write("src/A.src", "a");
    let producers: Vec<_> = (0..2)
        .map(|_| {
            Arc::new(
                CompileWork::new(transform(&sources)).with_delay(Duration::from_millis(200)),
            )
        })
        .collect();

    fixture.engine.start_build(&[]);
    let (left, right) = tokio::join!(
        fixture.engine.execute(producers[0].clone()),
        fixture.engine.execute(producers[1].clone())
    );
    fixture.engine.finish_build();

    let mut statuses = vec![left.status(), right.status()];
    statuses.sort_by_key(|status| status.to_string());
    assert_eq!(
        statuses,
        vec![ExecutionStatus::Executed, ExecutionStatus::UpToDate]
    );
    assert_eq!(left.workspace, right.workspace);

    let published: Vec<_> = fs::read_dir(fixture.path("state/workspaces/immutable"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(published.len(), 1);
}
