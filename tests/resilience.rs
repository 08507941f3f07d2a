//! Breakers, retries, deadlines and quotas seen through the orchestrator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use retrieval_core::config::{BackendConfig, QuotaConfig, RateLimitAlgorithm};
use retrieval_core::resilience::CircuitState;
use retrieval_core::{ErrorKind, JobError, JobEvent, JobRequest, JobStatus};

mod common;
use common::{orchestrator, test_config, wait_terminal, ScriptedBackend, Step};

fn failing() -> Arc<ScriptedBackend> {
    Arc::new(ScriptedBackend::new("svc").fallback(Step::Fail(JobError::transient("502 bad gateway"))))
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_after_threshold() {
    let mut config = test_config();
    config.orchestrator.max_concurrency = 1;
    let backend = failing();
    let orch = orchestrator(&config, vec![backend.clone()]);
    orch.start();

    for i in 0..5 {
        let id = orch
            .submit(JobRequest::new(format!("job-{i}")).max_attempts(1))
            .unwrap();
        let job = wait_terminal(&orch, &id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.unwrap().kind, ErrorKind::Transient);
    }
    let breaker = orch.registry().breaker("svc").unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);

    let id = orch.submit(JobRequest::new("job-5").max_attempts(1)).unwrap();
    let job = wait_terminal(&orch, &id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.last_error.unwrap().kind, ErrorKind::CircuitOpen);

    assert_eq!(backend.calls(), 5);
    assert_eq!(orch.stats().circuit_rejections, 1);
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_half_open_trial_closes_breaker() {
    let mut config = test_config();
    config.orchestrator.max_concurrency = 1;
    config.circuit_breaker.success_threshold = 1;
    let backend = Arc::new(
        ScriptedBackend::new("svc")
            .script((0..5).map(|_| Step::Fail(JobError::transient("refused")))),
    );
    let orch = orchestrator(&config, vec![backend.clone()]);
    orch.start();

    for i in 0..5 {
        let id = orch
            .submit(JobRequest::new(format!("job-{i}")).max_attempts(1))
            .unwrap();
        wait_terminal(&orch, &id).await;
    }
    let breaker = orch.registry().breaker("svc").unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_secs(60)).await;
    let id = orch.submit(JobRequest::new("probe").max_attempts(1)).unwrap();
    assert_eq!(wait_terminal(&orch, &id).await.status, JobStatus::Completed);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(backend.calls(), 6);
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted() {
    let config = test_config();
    let backend = failing();
    let orch = orchestrator(&config, vec![backend.clone()]);
    orch.start();

    let id = orch.submit(JobRequest::new("flaky")).unwrap();
    let job = wait_terminal(&orch, &id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 3);
    assert_eq!(job.last_error.unwrap().kind, ErrorKind::Transient);

    let stats = orch.stats();
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(backend.calls(), 3);
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_panicking_backend_fails_attempt_and_worker_survives() {
    let mut config = test_config();
    config.orchestrator.max_concurrency = 1;
    let backend = Arc::new(ScriptedBackend::new("svc").script([Step::Panic]));
    let orch = orchestrator(&config, vec![backend.clone()]);

    let a = orch.submit(JobRequest::new("a").max_attempts(1)).unwrap();
    let b = orch.submit(JobRequest::new("b")).unwrap();
    orch.start();

    let job = wait_terminal(&orch, &a).await;
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.last_error.unwrap();
    assert_eq!(error.kind, ErrorKind::Transient);
    assert!(error.message.contains("adapter exploded"), "{}", error.message);

    assert_eq!(wait_terminal(&orch, &b).await.status, JobStatus::Completed);
    assert_eq!(backend.calls(), 2);

    // One failure recorded, then paid back by b's success.
    let breaker = orch.registry().breaker("svc").unwrap().snapshot();
    assert!(breaker.since_last_failure_ms.is_some());
    assert_eq!(breaker.failure_count, 0);
    assert_eq!(breaker.state, CircuitState::Closed);
    assert_eq!(orch.registry().handles()[0].load(), 0);
    let stats = orch.stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.completed, 1);
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_panic_is_retried_like_transient_failure() {
    let config = test_config();
    let backend = Arc::new(ScriptedBackend::new("svc").script([Step::Panic]));
    let orch = orchestrator(&config, vec![backend.clone()]);
    orch.start();

    let id = orch.submit(JobRequest::new("page")).unwrap();
    let job = wait_terminal(&orch, &id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 2);
    assert_eq!(orch.stats().retries, 1);
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_job_deadline_enforced() {
    let config = test_config();
    let backend =
        Arc::new(ScriptedBackend::new("svc").fallback(Step::Sleep(Duration::from_secs(10))));
    let orch = orchestrator(&config, vec![backend]);
    orch.start();

    let started = Instant::now();
    let id = orch
        .submit(
            JobRequest::new("slow")
                .timeout(Duration::from_secs(1))
                .max_attempts(1),
        )
        .unwrap();
    let job = wait_terminal(&orch, &id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.last_error.unwrap().kind, ErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(orch.stats().timeouts, 1);
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_permanent_error_not_retried_or_charged() {
    let config = test_config();
    let backend = Arc::new(
        ScriptedBackend::new("svc").script([Step::Fail(JobError::permanent("malformed target"))]),
    );
    let orch = orchestrator(&config, vec![backend.clone()]);
    orch.start();

    let id = orch.submit(JobRequest::new("bad")).unwrap();
    let job = wait_terminal(&orch, &id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.last_error.unwrap().kind, ErrorKind::Permanent);
    assert_eq!(orch.stats().retries, 0);

    let snapshot = orch.registry().breaker("svc").unwrap().snapshot();
    assert_eq!(snapshot.failure_count, 0);
    assert_eq!(backend.calls(), 1);
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_backend_rate_limit_does_not_consume_attempt() {
    let config = test_config();
    let backend = Arc::new(ScriptedBackend::new("svc").script([Step::Fail(
        JobError::rate_limited("429 too many requests", Some(Duration::from_millis(200))),
    )]));
    let orch = orchestrator(&config, vec![backend.clone()]);
    orch.start();

    let started = Instant::now();
    let id = orch
        .submit(JobRequest::new("throttled").max_attempts(1))
        .unwrap();
    let job = wait_terminal(&orch, &id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 1);
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(backend.calls(), 2);
    assert!(orch.stats().rate_limited >= 1);
    assert_eq!(orch.registry().breaker("svc").unwrap().snapshot().failure_count, 0);
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_backend_quota_spaces_dispatch() {
    let mut config = test_config();
    config.rate_limit.algorithm = RateLimitAlgorithm::SlidingWindow;
    config.backends.push(BackendConfig {
        name: "svc".to_string(),
        priority: 0,
        enabled: true,
        rate_limit: Some(QuotaConfig::new(2, Duration::from_secs(60))),
        simulation: None,
    });
    let orch = orchestrator(&config, vec![Arc::new(ScriptedBackend::new("svc"))]);

    let started = Arc::new(Mutex::new(HashMap::new()));
    let ids: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|t| {
            let sink = started.clone();
            let observer = Arc::new(move |e: &JobEvent| {
                if let JobEvent::Started { job_id, .. } = e {
                    sink.lock().entry(*job_id).or_insert_with(Instant::now);
                }
            });
            orch.submit(JobRequest::new(t).observer(observer)).unwrap()
        })
        .collect();
    let origin = Instant::now();
    orch.start();

    for id in &ids {
        let job = wait_terminal(&orch, id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempts, 1);
    }
    let started: Vec<Duration> = {
        let seen = started.lock();
        ids.iter().map(|id| seen[id] - origin).collect()
    };
    assert!(started[0] < Duration::from_secs(1));
    assert!(started[1] < Duration::from_secs(1));
    assert!(started[2] >= Duration::from_secs(59));
    assert!(orch.stats().rate_limited >= 1);
    orch.shutdown().await;
}
