mod common;

use common::{CompileWork, Fixture};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use workcell_execution::{ExecutionStatus, UnitOfWork};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_runs_of_one_identity_are_serialized() {
    let fixture = Fixture::new();
    let source = fixture.write("src/A.src", "v1");
    let work = Arc::new(
        CompileWork::new(CompileWork::declaration(
            ":compile",
            &source,
            &fixture.path("build/A.out"),
        ))
        .with_delay(Duration::from_millis(200)),
    );

    fixture.engine.start_build(&[]);
    let works: Vec<Arc<dyn UnitOfWork>> = vec![work.clone(), work.clone()];
    let summary = fixture.engine.execute_all(works, 4).await;
    fixture.engine.finish_build();

    // The second run waits for the first, then finds its outputs up to date
    assert_eq!(summary.count(ExecutionStatus::Executed), 1);
    assert_eq!(summary.count(ExecutionStatus::UpToDate), 1);
    assert_eq!(work.executions(), 1);
    assert_eq!(work.max_active(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_independent_work_runs_in_parallel() {
    let fixture = Fixture::new();
    let mut works = Vec::new();
    for name in ["a", "b", "c"] {
        let source = fixture.write(&format!("{name}/src/A.src"), name);
        works.push(Arc::new(
            CompileWork::new(CompileWork::declaration(
                &format!(":{name}:compile"),
                &source,
                &fixture.path(&format!("{name}/build/A.out")),
            ))
            .with_delay(Duration::from_millis(300)),
        ));
    }

    fixture.engine.start_build(&[]);
    let started = std::time::Instant::now();
    let summary = fixture
        .engine
        .execute_all(
            works
                .iter()
                .map(|work| work.clone() as Arc<dyn UnitOfWork>)
                .collect(),
            3,
        )
        .await;
    fixture.engine.finish_build();

    assert_eq!(summary.count(ExecutionStatus::Executed), 3);
    assert!(started.elapsed() < Duration::from_millis(900));
}

#[tokio::test]
async fn test_one_failure_does_not_stop_the_others() {
    let fixture = Fixture::new();
    let mut works = Vec::new();
    for name in ["a", "b", "c"] {
        let source = fixture.write(&format!("{name}/src/A.src"), name);
        works.push(Arc::new(CompileWork::new(CompileWork::declaration(
            &format!(":{name}:compile"),
            &source,
            &fixture.path(&format!("{name}/build/A.out")),
        ))));
    }
    works[1].fail.store(true, Ordering::SeqCst);

    fixture.engine.start_build(&[]);
    let summary = fixture
        .engine
        .execute_all(
            works
                .iter()
                .map(|work| work.clone() as Arc<dyn UnitOfWork>)
                .collect(),
            1,
        )
        .await;
    fixture.engine.finish_build();

    let names: Vec<_> = summary
        .reports
        .iter()
        .map(|report| report.display_name.as_str())
        .collect();
    assert_eq!(names, vec![":a:compile", ":b:compile", ":c:compile"]);
    assert_eq!(summary.count(ExecutionStatus::Executed), 2);
    assert_eq!(summary.failures().count(), 1);
    assert!(summary.into_result().is_err());
}
