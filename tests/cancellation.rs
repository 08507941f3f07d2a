//! Cancellation of pending, in-flight and retry-waiting jobs.

use std::sync::Arc;
use std::time::Duration;

use retrieval_core::{JobEvent, JobError, JobRequest, JobStatus};

mod common;
use common::{orchestrator, test_config, wait_terminal, wait_until, ScriptedBackend, Step};

#[tokio::test(start_paused = true)]
async fn test_cancel_before_start_never_executes() {
    let config = test_config();
    let backend = Arc::new(ScriptedBackend::new("svc"));
    let orch = orchestrator(&config, vec![backend.clone()]);

    let id = orch.submit(JobRequest::new("page")).unwrap();
    assert!(orch.cancel(&id));
    orch.start();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(orch.status(&id).unwrap().status, JobStatus::Cancelled);
    assert_eq!(backend.calls(), 0);
    assert_eq!(orch.stats().cancelled, 1);
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancel_in_flight_job() {
    let config = test_config();
    let backend = Arc::new(ScriptedBackend::new("svc").fallback(Step::Block));
    let orch = orchestrator(&config, vec![backend.clone()]);
    orch.start();

    let mut events = orch.subscribe();
    let id = orch.submit(JobRequest::new("stream")).unwrap();
    wait_until(|| orch.status(&id).is_some_and(|j| j.status == JobStatus::Executing)).await;

    assert!(orch.cancel(&id));
    let job = wait_terminal(&orch, &id).await;
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.attempts, 1);
    assert_eq!(backend.calls(), 1);

    let breaker = orch.registry().breaker("svc").unwrap().snapshot();
    assert_eq!(breaker.failure_count, 0);
    assert_eq!(orch.registry().handles()[0].load(), 0);
    assert!(!orch.cancel(&id));

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name());
    }
    assert_eq!(names, vec!["queued", "started", "cancelled"]);
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_waiting_to_retry() {
    let mut config = test_config();
    config.retries.base_delay_ms = 10_000;
    config.retries.max_delay_ms = 10_000;
    let backend = Arc::new(
        ScriptedBackend::new("svc").script([Step::Fail(JobError::transient("reset"))]),
    );
    let orch = orchestrator(&config, vec![backend.clone()]);
    orch.start();

    let id = orch.submit(JobRequest::new("page")).unwrap();
    wait_until(|| orch.status(&id).is_some_and(|j| j.status == JobStatus::Retrying)).await;

    assert!(orch.cancel(&id));
    let job = wait_terminal(&orch, &id).await;
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(backend.calls(), 1);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_submit_then_cancel_immediately() {
    let config = test_config();
    let backend = Arc::new(ScriptedBackend::new("svc"));
    let orch = orchestrator(&config, vec![backend.clone()]);
    orch.start();

    let mut cancelled = 0;
    for i in 0..20 {
        let id = orch.submit(JobRequest::new(format!("job-{i}"))).unwrap();
        if orch.cancel(&id) {
            cancelled += 1;
            let job = wait_terminal(&orch, &id).await;
            assert!(matches!(job.status, JobStatus::Cancelled | JobStatus::Completed));
        }
    }
    assert!(cancelled > 0);
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_event_reaches_observer_once() {
    let config = test_config();
    let orch = orchestrator(&config, vec![Arc::new(ScriptedBackend::new("svc"))]);

    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let id = orch
        .submit(JobRequest::new("page").observer(Arc::new(move |e: &JobEvent| {
            sink.lock().push(e.name())
        })))
        .unwrap();
    assert!(orch.cancel(&id));
    assert!(!orch.cancel(&id));

    assert_eq!(*seen.lock(), vec!["queued", "cancelled"]);
}
