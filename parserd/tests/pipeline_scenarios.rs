//! End-to-end scenarios for the coordination core, using the in-memory
//! database backend and the stub transform.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parserd::pipeline::{Pipeline, PipelineShutdown};
use parserd::test_utils::{InMemoryBackend, StubTransform, SubmissionSeed};
use parserd::types::ClaimStatus;
use parserd::workers::WorkerSummary;
use parserd_config::shared::{PipelineConfig, RetryConfig};
use tempfile::TempDir;

fn test_config(reportdir: &Path, threads: usize, queue_capacity: usize) -> PipelineConfig {
    PipelineConfig {
        xsltpath: reportdir.to_path_buf(),
        reportdir: reportdir.to_path_buf(),
        threads: Some(threads),
        queue_capacity: Some(queue_capacity),
        // Shortened so saturation scenarios finish in test time.
        queue_full_backoff_ms: 150,
        retry: RetryConfig {
            initial_delay_ms: 10,
            max_delay_ms: 50,
            backoff_multiplier: 2.0,
            max_attempts: 3,
        },
    }
}

struct RunningPipeline {
    handle: PipelineShutdown,
    thread: thread::JoinHandle<(parserd::error::ParserdResult<()>, WorkerSummary)>,
}

fn start_pipeline(
    backend: &InMemoryBackend,
    transform: Arc<StubTransform>,
    config: PipelineConfig,
) -> RunningPipeline {
    let mut pipeline = Pipeline::new(config, backend.session_factory(), transform);
    pipeline.start().expect("pipeline start");
    let handle = pipeline.shutdown_handle();

    let thread = thread::spawn(move || {
        let result = pipeline.run();
        let summary = pipeline.wait();
        (result, summary)
    });

    RunningPipeline { handle, thread }
}

fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn cold_start_with_empty_queue_shuts_down_quickly() {
    let reportdir = TempDir::new().unwrap();
    let backend = InMemoryBackend::new();
    let transform = Arc::new(StubTransform::new());

    let running = start_pipeline(&backend, transform, test_config(reportdir.path(), 2, 5));

    // Let the producer park in the notification wait.
    thread::sleep(Duration::from_millis(150));

    let triggered_at = Instant::now();
    assert!(running.handle.shutdown());

    let (result, summary) = running.thread.join().unwrap();
    assert!(triggered_at.elapsed() < Duration::from_secs(2));
    result.unwrap();
    assert_eq!(summary.processed, 0);
}

#[test]
fn steady_state_processes_all_jobs_with_per_client_serialisation() {
    let reportdir = TempDir::new().unwrap();
    let backend = InMemoryBackend::new();
    let transform = Arc::new(StubTransform::new().with_latency(Duration::from_millis(20)));

    let clients = ["a", "a", "b", "a", "b", "c", "c", "a", "b", "c"];
    backend.seed_submissions(
        clients
            .iter()
            .enumerate()
            .map(|(i, client)| {
                SubmissionSeed::new(i as i32 + 1, *client, format!("/tmp/sub-{}.xml", i + 1))
            }),
    );

    let running = start_pipeline(
        &backend,
        transform.clone(),
        test_config(reportdir.path(), 3, 5),
    );

    assert!(wait_until(|| backend.all_terminal(), Duration::from_secs(10)));
    running.handle.shutdown();
    let (result, summary) = running.thread.join().unwrap();
    result.unwrap();

    assert_eq!(summary.processed, 10);
    assert_eq!(summary.succeeded, 10);
    for id in 1..=10 {
        assert_eq!(backend.status_of(id), Some(ClaimStatus::Succeeded));
        assert!(backend.persisted_rows(id).is_some());
    }

    // Jobs were claimed in FIFO order.
    assert_eq!(backend.claimed_order(), (1..=10).collect::<Vec<_>>());

    // The arbiter kept same-client processing serialised.
    for client in ["a", "b", "c"] {
        assert!(transform.max_overlap(client) <= 1, "client {client} overlapped");
    }

    // Report documents landed in the per-client subtrees.
    assert!(reportdir.path().join("a").join("report-1.xml").is_file());
    assert!(reportdir.path().join("c").join("report-10.xml").is_file());
}

#[test]
fn queue_saturation_backs_off_without_losing_jobs() {
    let reportdir = TempDir::new().unwrap();
    let backend = InMemoryBackend::new();
    let transform = Arc::new(StubTransform::new().with_latency(Duration::from_millis(100)));

    backend.seed_submissions(
        (1..=5).map(|id| SubmissionSeed::new(id, format!("client-{id}"), "/tmp/sub.xml")),
    );

    // One slow worker and a two-slot queue force the producer into backoff.
    let running = start_pipeline(&backend, transform, test_config(reportdir.path(), 1, 2));

    assert!(wait_until(|| backend.all_terminal(), Duration::from_secs(30)));
    running.handle.shutdown();
    let (result, summary) = running.thread.join().unwrap();
    result.unwrap();

    assert_eq!(summary.succeeded, 5);
    // Claimed exactly once each, in order: nothing lost, nothing duplicated.
    assert_eq!(backend.claimed_order(), vec![1, 2, 3, 4, 5]);
    for id in 1..=5 {
        assert_eq!(backend.status_of(id), Some(ClaimStatus::Succeeded));
        assert_eq!(backend.persist_attempts(id), 1);
    }
}

#[test]
fn malformed_payload_is_rejected_and_others_proceed() {
    let reportdir = TempDir::new().unwrap();
    let backend = InMemoryBackend::new();
    let transform = Arc::new(StubTransform::new());
    transform.reject_submission(2);

    backend.seed_submissions(
        (1..=3).map(|id| SubmissionSeed::new(id, "client-a", "/tmp/sub.xml")),
    );

    let running = start_pipeline(&backend, transform, test_config(reportdir.path(), 2, 5));

    assert!(wait_until(|| backend.all_terminal(), Duration::from_secs(10)));
    running.handle.shutdown();
    let (result, summary) = running.thread.join().unwrap();
    result.unwrap();

    assert_eq!(backend.status_of(1), Some(ClaimStatus::Succeeded));
    assert_eq!(backend.status_of(2), Some(ClaimStatus::Rejected));
    assert_eq!(backend.status_of(3), Some(ClaimStatus::Succeeded));
    assert!(backend.reason_of(2).unwrap().contains("parse"));
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.succeeded, 2);
}

#[test]
fn transient_transform_failure_marks_submission_failed() {
    let reportdir = TempDir::new().unwrap();
    let backend = InMemoryBackend::new();
    let transform = Arc::new(StubTransform::new());
    transform.fail_submission(1);

    backend.seed_submissions([SubmissionSeed::new(1, "client-a", "/tmp/sub.xml")]);

    let running = start_pipeline(&backend, transform, test_config(reportdir.path(), 1, 5));

    assert!(wait_until(|| backend.all_terminal(), Duration::from_secs(10)));
    running.handle.shutdown();
    let (result, summary) = running.thread.join().unwrap();
    result.unwrap();

    assert_eq!(backend.status_of(1), Some(ClaimStatus::Failed));
    assert_eq!(summary.failed, 1);
}

#[test]
fn transient_persist_failures_are_retried_to_success() {
    let reportdir = TempDir::new().unwrap();
    let backend = InMemoryBackend::new();
    let transform = Arc::new(StubTransform::new());

    backend.seed_submissions([SubmissionSeed::new(1, "client-a", "/tmp/sub.xml")]);
    backend.script_persist_failures(1, 2);

    let running = start_pipeline(&backend, transform, test_config(reportdir.path(), 1, 5));

    assert!(wait_until(|| backend.all_terminal(), Duration::from_secs(10)));
    running.handle.shutdown();
    let (result, summary) = running.thread.join().unwrap();
    result.unwrap();

    assert_eq!(backend.status_of(1), Some(ClaimStatus::Succeeded));
    assert_eq!(backend.persist_attempts(1), 3);
    assert_eq!(summary.succeeded, 1);
}

#[test]
fn persist_retry_exhaustion_marks_submission_failed() {
    let reportdir = TempDir::new().unwrap();
    let backend = InMemoryBackend::new();
    let transform = Arc::new(StubTransform::new());

    backend.seed_submissions([SubmissionSeed::new(1, "client-a", "/tmp/sub.xml")]);
    backend.script_persist_failures(1, 10);

    let running = start_pipeline(&backend, transform, test_config(reportdir.path(), 1, 5));

    assert!(wait_until(|| backend.all_terminal(), Duration::from_secs(10)));
    running.handle.shutdown();
    let (result, _summary) = running.thread.join().unwrap();
    result.unwrap();

    assert_eq!(backend.status_of(1), Some(ClaimStatus::Failed));
    assert_eq!(backend.persist_attempts(1), 3);
    assert!(backend.reason_of(1).unwrap().contains("persist"));
}

#[test]
fn repeated_shutdown_triggers_are_idempotent() {
    let reportdir = TempDir::new().unwrap();
    let backend = InMemoryBackend::new();
    let transform = Arc::new(StubTransform::new());

    let running = start_pipeline(&backend, transform, test_config(reportdir.path(), 2, 5));
    thread::sleep(Duration::from_millis(50));

    assert!(running.handle.shutdown());
    assert!(!running.handle.shutdown());
    assert!(!running.handle.shutdown());
    assert!(running.handle.is_shutdown());

    let (result, _) = running.thread.join().unwrap();
    result.unwrap();
}

#[test]
fn connection_failure_at_startup_is_an_initialisation_error() {
    let reportdir = TempDir::new().unwrap();
    let backend = InMemoryBackend::new();
    backend.fail_connections();
    let transform = Arc::new(StubTransform::new());

    let mut pipeline = Pipeline::new(
        test_config(reportdir.path(), 2, 5),
        backend.session_factory(),
        transform,
    );
    assert!(pipeline.start().is_err());
}

#[test]
fn missing_report_directory_is_an_initialisation_error() {
    let backend = InMemoryBackend::new();
    let transform = Arc::new(StubTransform::new());

    let mut pipeline = Pipeline::new(
        test_config(Path::new("/nonexistent/rteval-reports"), 2, 5),
        backend.session_factory(),
        transform,
    );
    assert!(pipeline.start().is_err());
}
