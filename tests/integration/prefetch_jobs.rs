//! Background prefetch job lifecycle and cache eviction.

use std::time::Duration;

use rigger::config::FeatureFlags;
use rigger::exec::BatchRunner;
use rigger::prefetch::{package_list, BackgroundPrefetcher, JobOutcome};

use crate::fixtures::TestProject;

/// Test: Prefetch lifecycle driven by feature flags
/// Given redis and database enabled
/// When a job starts and is waited on
/// Then every derived package is attempted and cached
#[tokio::test]
async fn test_prefetch_warms_feature_packages() {
    let project = TestProject::new();
    let config = project.prefetch_config("true");
    let mut prefetcher = BackgroundPrefetcher::new(&config, &project.root).unwrap();

    let features = FeatureFlags {
        database: true,
        redis: true,
        ..Default::default()
    };
    let expected = package_list(&features);
    assert_eq!(expected.len(), 4);

    let id = prefetcher.start_for_config(&features).unwrap();
    let outcome = prefetcher.wait(id, Duration::from_secs(10)).await.unwrap();

    assert_eq!(
        outcome,
        JobOutcome::Completed {
            attempted: 4,
            failed: 0
        }
    );
    for package in &expected {
        assert!(prefetcher.cache().contains(package), "missing {}", package);
    }
    assert!(prefetcher.cache_size() > 0);
}

/// Test: Prefetch failure is invisible to orchestration correctness
/// Given a fetch command that always fails
/// When a batch runs alongside the failing prefetch job
/// Then the batch result is identical to a run without prefetching
#[tokio::test]
async fn test_batch_unaffected_by_failing_prefetch() {
    let project = TestProject::new();
    project.write_task("a.sh", "# Phase: 1\nexit 0\n");
    project.write_task("b.sh", "# Phase: 2\nexit 0\n");

    let config = project.prefetch_config("false");
    let mut prefetcher = BackgroundPrefetcher::new(&config, &project.root).unwrap();
    let id = prefetcher.start_for_config(&config.features).unwrap();

    let mut catalog = project.catalog();
    catalog.refresh(false).unwrap();
    let store = project.store();
    let summary = BatchRunner::new(project.sequencer(), &store)
        .run_directory(&catalog)
        .await
        .unwrap();

    assert_eq!(summary.passed, 2);
    assert_eq!(summary.failed, 0);

    let outcome = prefetcher.wait(id, Duration::from_secs(10)).await.unwrap();
    assert_eq!(
        outcome,
        JobOutcome::Completed {
            attempted: 2,
            failed: 2
        }
    );
}

/// Test: Wait timeout forcibly stops the job
/// Given a fetch command that hangs
/// When wait is called with a short timeout
/// Then TimedOut is returned promptly and the handle is released
#[tokio::test]
async fn test_wait_timeout_kills_hung_job() {
    let project = TestProject::new();
    let script = project.path("slowfetch.sh");
    std::fs::write(&script, "sleep 30\n").unwrap();
    let config = project.prefetch_config(&format!("bash {}", script.display()));

    let mut prefetcher = BackgroundPrefetcher::new(&config, &project.root).unwrap();
    let id = prefetcher.start_for_config(&config.features).unwrap();
    assert!(prefetcher.is_running(id));

    let started = std::time::Instant::now();
    let outcome = prefetcher
        .wait(id, Duration::from_millis(300))
        .await
        .unwrap();

    assert!(matches!(outcome, JobOutcome::TimedOut { .. }));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!prefetcher.is_running(id));
}

/// Test: Job log has one line per attempt
/// Given a job over the base package list
/// When the job completes
/// Then the job-scoped log holds exactly one progress line per package
#[tokio::test]
async fn test_job_log_one_line_per_package() {
    let project = TestProject::new();
    let config = project.prefetch_config("true");
    let mut prefetcher = BackgroundPrefetcher::new(&config, &project.root).unwrap();

    let id = prefetcher.start_for_config(&FeatureFlags::default()).unwrap();
    let log_path = prefetcher.log_path(id).unwrap().to_path_buf();
    prefetcher.wait(id, Duration::from_secs(10)).await.unwrap();

    let log = std::fs::read_to_string(log_path).unwrap();
    assert_eq!(log.lines().count(), 2);
}

/// Test: Cache max-age eviction
/// Given one expired and one fresh cache entry
/// When a sweep runs
/// Then only the expired entry is gone
#[tokio::test]
async fn test_cache_max_age_eviction() {
    let project = TestProject::new();

    // Expire-everything cache: the pre-warmed entry ages out instantly.
    let mut expired_config = project.prefetch_config("true");
    expired_config.cache_max_age_secs = 0;
    let prefetcher = BackgroundPrefetcher::new(&expired_config, &project.root).unwrap();
    prefetcher.cache().warm("stale:1.0").unwrap();
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(prefetcher.sweep_expired(), 1);
    assert!(!prefetcher.cache().contains("stale:1.0"));

    // Wide-window cache: a fresh entry survives the sweep.
    let fresh_config = project.prefetch_config("true");
    let prefetcher = BackgroundPrefetcher::new(&fresh_config, &project.root).unwrap();
    prefetcher.cache().warm("fresh:1.0").unwrap();
    assert_eq!(prefetcher.sweep_expired(), 0);
    assert!(prefetcher.cache().contains("fresh:1.0"));
}

/// Test: Purge empties the cache
/// Given warmed entries and no running job
/// When purge runs
/// Then the cache is empty and size reports zero
#[tokio::test]
async fn test_purge_empties_cache() {
    let project = TestProject::new();
    let config = project.prefetch_config("true");
    let prefetcher = BackgroundPrefetcher::new(&config, &project.root).unwrap();
    prefetcher.cache().warm("nginx:1.27-alpine").unwrap();
    prefetcher.cache().warm("redis:7-alpine").unwrap();

    assert_eq!(prefetcher.purge(), 2);
    assert_eq!(prefetcher.cache_size(), 0);
}
