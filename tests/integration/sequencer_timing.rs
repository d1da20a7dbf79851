//! Timeout, retry, and verification bounds, driven through script headers.

use std::time::{Duration, Instant};

use rigger::core::task::ExecStatus;
use rigger::exec::BatchRunner;

use crate::fixtures::TestProject;

/// Test: Timeout bound
/// Given a task with a 1s timeout whose process sleeps 10s
/// When the task runs
/// Then the status is timeout and the call returns within timeout + grace
#[tokio::test]
async fn test_timeout_bound_holds() {
    let project = TestProject::new();
    project.write_task("hang.sh", "# Phase: 1\n# Timeout: 1\n# Retries: 2\nsleep 10\n");

    let mut catalog = project.catalog();
    catalog.refresh(false).unwrap();
    let store = project.store();

    let started = Instant::now();
    let summary = BatchRunner::new(project.sequencer(), &store)
        .run_directory(&catalog)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(summary.results[0].status, ExecStatus::Timeout);
    assert_eq!(summary.results[0].attempts, 1);
    assert!(
        elapsed < Duration::from_secs(4),
        "timed-out run took {:?}",
        elapsed
    );
}

/// Test: Retry then succeed
/// Given a task that fails on attempt 1 and succeeds on attempt 2
/// When the task runs with Retries: 2
/// Then the status is success with attempts == 2
#[tokio::test]
async fn test_retry_then_succeed() {
    let project = TestProject::new();
    project.write_task(
        "flaky.sh",
        "# Phase: 1\n# Retries: 2\nif [ -f flaky.marker ]; then exit 0; fi\ntouch flaky.marker\nexit 1\n",
    );

    let mut catalog = project.catalog();
    catalog.refresh(false).unwrap();
    let store = project.store();

    let summary = BatchRunner::new(project.sequencer(), &store)
        .run_directory(&catalog)
        .await
        .unwrap();

    assert_eq!(summary.results[0].status, ExecStatus::Success);
    assert_eq!(summary.results[0].attempts, 2);
    assert!(store.has_succeeded("flaky.sh"));
}

/// Test: Verification overrides process success
/// Given a task whose process exits 0 but whose Test command fails
/// When the task runs with retries remaining
/// Then the status is test_failed and there is no retry
#[tokio::test]
async fn test_verification_overrides_success_without_retry() {
    let project = TestProject::new();
    project.write_task(
        "verified.sh",
        "# Phase: 1\n# Retries: 3\n# Test: false\necho ran >> attempts.txt\n",
    );

    let mut catalog = project.catalog();
    catalog.refresh(false).unwrap();
    let store = project.store();

    let summary = BatchRunner::new(project.sequencer(), &store)
        .run_directory(&catalog)
        .await
        .unwrap();

    assert_eq!(summary.results[0].status, ExecStatus::TestFailed);
    assert_eq!(summary.results[0].attempts, 1);

    let attempts = std::fs::read_to_string(project.path("attempts.txt")).unwrap();
    assert_eq!(attempts.lines().count(), 1);
    assert!(!store.has_succeeded("verified.sh"));
}

/// Test: Verification success preserves success
/// Given a task whose Test command checks the process's own output
/// When the task runs
/// Then the status is success
#[tokio::test]
async fn test_verification_passes_on_real_output() {
    let project = TestProject::new();
    project.write_task(
        "writes.sh",
        "# Phase: 1\n# Test: test -f produced.txt\necho done > produced.txt\n",
    );

    let mut catalog = project.catalog();
    catalog.refresh(false).unwrap();
    let store = project.store();

    let summary = BatchRunner::new(project.sequencer(), &store)
        .run_directory(&catalog)
        .await
        .unwrap();

    assert_eq!(summary.results[0].status, ExecStatus::Success);
}

/// Test: Failure consumes the whole retry budget
/// Given a task that always fails with Retries: 2
/// When the task runs
/// Then attempts == 3 and the status is failure
#[tokio::test]
async fn test_failure_exhausts_retry_budget() {
    let project = TestProject::new();
    project.write_task(
        "always-fails.sh",
        "# Phase: 1\n# Retries: 2\necho ran >> attempts.txt\nexit 1\n",
    );

    let mut catalog = project.catalog();
    catalog.refresh(false).unwrap();
    let store = project.store();

    let summary = BatchRunner::new(project.sequencer(), &store)
        .run_directory(&catalog)
        .await
        .unwrap();

    assert_eq!(summary.results[0].status, ExecStatus::Failure);
    assert_eq!(summary.results[0].attempts, 3);

    let attempts = std::fs::read_to_string(project.path("attempts.txt")).unwrap();
    assert_eq!(attempts.lines().count(), 3);
}
