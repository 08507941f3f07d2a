//! Stats snapshot consistency with jobs in every phase.

use std::sync::Arc;

use retrieval_core::health::HealthMonitor;
use retrieval_core::observability::snapshot::StatsSnapshot;
use retrieval_core::{JobRequest, JobStatus};

mod common;
use common::{orchestrator, test_config, wait_terminal, wait_until, ScriptedBackend, Step};

#[tokio::test(start_paused = true)]
async fn test_snapshot_counts_each_job_once() {
    let mut config = test_config();
    config.orchestrator.max_concurrency = 1;
    let backend = Arc::new(ScriptedBackend::new("svc").script([Step::Succeed, Step::Block]));
    let orch = orchestrator(&config, vec![backend]);
    let health = HealthMonitor::new(orch.registry().clone(), config.health_check.clone());
    orch.start();

    let done = orch.submit(JobRequest::new("done")).unwrap();
    wait_terminal(&orch, &done).await;
    let blocked = orch.submit(JobRequest::new("blocked")).unwrap();
    wait_until(|| orch.status(&blocked).is_some_and(|j| j.status == JobStatus::Executing)).await;

    let pending: Vec<_> = (0..3)
        .map(|i| orch.submit(JobRequest::new(format!("pending-{i}"))).unwrap())
        .collect();
    assert!(orch.cancel(&pending[0]));

    let snapshot = StatsSnapshot::collect(&orch, &health);
    assert_eq!(snapshot.queue.pending, 2);
    assert_eq!(snapshot.queue.in_flight, 1);
    assert_eq!(snapshot.queue.terminal, 2);
    assert_eq!(snapshot.tracked_jobs(), 5);
    assert_eq!(snapshot.tracked_jobs() as u64, snapshot.orchestrator.submitted);
    assert_eq!(snapshot.queue, orch.queue_counts());
    assert_eq!(snapshot.orchestrator.in_flight, 1);
    assert_eq!(snapshot.registry.backends[0].load, 1);
    assert_eq!(snapshot.health.len(), 1);
    assert_eq!(snapshot.status_counts(), vec![("healthy".to_string(), 1)]);

    let listed = orch.queue_snapshot();
    assert_eq!(listed.pending.len(), snapshot.queue.pending);
    assert_eq!(listed.in_flight.len(), snapshot.queue.in_flight);

    let json = serde_json::to_string(&snapshot).unwrap();
    let parsed: StatsSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, snapshot);

    assert!(orch.cancel(&blocked));
    wait_terminal(&orch, &blocked).await;
    orch.shutdown().await;
}
