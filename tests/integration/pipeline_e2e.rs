//! End-to-end pipeline tests: refresh -> run -> resume.

use rigger::core::task::ExecStatus;
use rigger::exec::BatchRunner;

use crate::fixtures::TestProject;

/// Test: Full directory run over a phased task tree
/// Given a task tree with phases, dependencies, and required vars
/// When the catalog refreshes and the runner executes the directory
/// Then tasks run in phase order and the summary reflects every task
#[tokio::test]
async fn test_directory_run_end_to_end() {
    let project = TestProject::new();
    project.write_task(
        "30-app/migrate.sh",
        "# Phase: 30\n# Dependencies: 10-base/packages.sh\necho migrate >> trace.txt\n",
    );
    project.write_task(
        "10-base/packages.sh",
        "# Phase: 10\n# Required: APP_NAME\necho base >> trace.txt\n",
    );
    project.write_task(
        "20-web/nginx.sh",
        "# Phase: 20\n# Required: DOMAIN\necho web >> trace.txt\n",
    );

    let mut catalog = project.catalog();
    let report = catalog.refresh(false).unwrap();
    assert_eq!(report.entries, 3);

    let all_vars = catalog.all_required_vars();
    assert!(all_vars.contains("APP_NAME"));
    assert!(all_vars.contains("DOMAIN"));

    let store = project.store();
    let batch = BatchRunner::new(project.sequencer(), &store);
    let summary = batch.run_directory(&catalog).await.unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.passed, 3);
    assert_eq!(summary.failed, 0);

    let trace = std::fs::read_to_string(project.path("trace.txt")).unwrap();
    assert_eq!(
        trace.lines().collect::<Vec<_>>(),
        vec!["base", "web", "migrate"]
    );
}

/// Test: Resuming a partially completed run
/// Given a run where one mid-list task failed
/// When the directory is run again after the script is fixed
/// Then finished work is skipped and only the failed task re-executes
#[tokio::test]
async fn test_resume_skips_finished_work() {
    let project = TestProject::new();
    project.write_task("a.sh", "# Phase: 10\n# Retries: 0\necho a >> runs.txt\n");
    project.write_task(
        "b.sh",
        "# Phase: 20\n# Retries: 0\necho b >> runs.txt\nexit 1\n",
    );
    project.write_task("c.sh", "# Phase: 30\n# Retries: 0\necho c >> runs.txt\n");

    let mut catalog = project.catalog();
    catalog.refresh(false).unwrap();
    let store = project.store();

    let first = BatchRunner::new(project.sequencer(), &store)
        .run_directory(&catalog)
        .await
        .unwrap();
    assert_eq!(first.passed, 2);
    assert_eq!(first.failed, 1);
    assert!(store.has_succeeded("a.sh"));
    assert!(!store.has_succeeded("b.sh"));

    // Fix the failing task and run again.
    project.write_task("b.sh", "# Phase: 20\n# Retries: 0\necho b >> runs.txt\n");
    let second = BatchRunner::new(project.sequencer(), &store)
        .run_directory(&catalog)
        .await
        .unwrap();

    assert_eq!(second.passed, 3);
    assert!(second.results[0].was_skipped());
    assert!(!second.results[1].was_skipped());
    assert!(second.results[2].was_skipped());

    // a and c ran exactly once, b ran in both invocations.
    let runs = std::fs::read_to_string(project.path("runs.txt")).unwrap();
    assert_eq!(runs.lines().collect::<Vec<_>>(), vec!["a", "b", "c", "b"]);
}

/// Test: A failed task does not corrupt sibling execution
/// Given independent siblings around a failing task
/// When the directory runs
/// Then siblings complete and only dependents of the failure are gated
#[tokio::test]
async fn test_failure_isolated_to_dependents() {
    let project = TestProject::new();
    project.write_task("10-ok.sh", "# Phase: 10\n# Retries: 0\nexit 0\n");
    project.write_task("20-broken.sh", "# Phase: 20\n# Retries: 0\nexit 1\n");
    project.write_task(
        "30-child.sh",
        "# Phase: 30\n# Dependencies: 20-broken.sh\nexit 0\n",
    );
    project.write_task("30-bystander.sh", "# Phase: 30\n# Retries: 0\nexit 0\n");

    let mut catalog = project.catalog();
    catalog.refresh(false).unwrap();
    let store = project.store();

    let summary = BatchRunner::new(project.sequencer(), &store)
        .run_directory(&catalog)
        .await
        .unwrap();

    let status_of = |id: &str| {
        summary
            .results
            .iter()
            .find(|r| r.task_id.as_str() == id)
            .map(|r| r.status)
            .unwrap()
    };
    assert_eq!(status_of("10-ok.sh"), ExecStatus::Success);
    assert_eq!(status_of("20-broken.sh"), ExecStatus::Failure);
    assert_eq!(status_of("30-child.sh"), ExecStatus::DepFailed);
    assert_eq!(status_of("30-bystander.sh"), ExecStatus::Success);
}

/// Test: Index freshness across catalog instances
/// Given a refreshed index on disk
/// When a new catalog instance refreshes within the freshness window
/// Then the index is reused without a second filesystem scan
#[tokio::test]
async fn test_index_reused_across_instances() {
    let project = TestProject::new();
    project.write_task("a.sh", "# Phase: 1\n");

    let mut first = project.catalog();
    let report = first.refresh(false).unwrap();
    assert!(report.scanned);

    let mut second = project.catalog();
    let report = second.refresh(false).unwrap();
    assert!(!report.scanned);
    assert_eq!(report.entries, 1);
    assert_eq!(second.scan_count(), 0);
    assert_eq!(second.entries()[0].path.as_str(), "a.sh");
}
