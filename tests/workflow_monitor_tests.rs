//! Workflow monitor tests
//!
//! These tests drive the monitor one tick at a time against a real state
//! document in a temp directory, simulating workers by writing their slots
//! directly through the store.
//!
//! Test coverage:
//! - Phase advancement and next-agent activation
//! - Stall detection, retries and terminal failure
//! - Heartbeats, completion, cancellation and error backoff

use agent_relay::state::{AgentId, AgentStatus, Phase, StateStore, StoreConfig, StoreError};
use agent_relay::workflows::{
    MonitorConfig, MonitorOutcome, PhaseAdvance, StallAction, TickOutcome, WorkflowMonitor,
};
use agent_relay::WorkflowDocument;
use chrono::{Duration as ChronoDuration, Utc};
use fd_lock::RwLock;
use std::fs::OpenOptions;
use std::sync::mpsc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn test_store(temp_dir: &TempDir) -> StateStore {
    StateStore::new(StoreConfig {
        state_file: temp_dir.path().join("agent-state.json"),
        lock_timeout_ms: 2_000,
        lock_poll_interval_ms: 5,
    })
}

fn fast_config() -> MonitorConfig {
    MonitorConfig {
        poll_interval_secs: 0,
        error_backoff_secs: 0,
        ..MonitorConfig::default()
    }
}

/// Simulate a worker that went quiet `age_secs` ago while in progress
async fn stall(store: &StateStore, agent: AgentId, age_secs: i64) {
    let stale = Utc::now() - ChronoDuration::seconds(age_secs);
    store
        .update(move |mut doc| {
            doc.set_agent_status(agent, AgentStatus::InProgress, None, stale);
            doc
        })
        .await
        .unwrap();
}

async fn workflow_in_phase(store: &StateStore, phase: Phase) {
    store
        .start_new_workflow(vec!["req1".into(), "req2".into()], "monitor-test")
        .await
        .unwrap();
    store.set_workflow_phase(phase).await.unwrap();
}

#[tokio::test]
async fn test_planner_completion_advances_to_test_writing() {
    let temp_dir = TempDir::new().unwrap();
    let store = test_store(&temp_dir);
    store.initialize(false).await.unwrap();
    store
        .start_new_workflow(vec!["req1".into(), "req2".into()], "e2e")
        .await
        .unwrap();
    store
        .update_agent_status(AgentId::Planner, AgentStatus::Completed, None)
        .await
        .unwrap();

    let mut monitor = WorkflowMonitor::new(store.clone(), fast_config());
    let report = monitor.tick().await.unwrap();

    assert_eq!(
        report.advance,
        Some(PhaseAdvance {
            completed: AgentId::Planner,
            from: Phase::Planning,
            to: Phase::TestWriting,
            activated: Some(AgentId::TestWriter),
        })
    );
    assert_eq!(report.outcome, TickOutcome::Continue);

    let doc = store.read().await.unwrap();
    assert_eq!(doc.phase.current, Phase::TestWriting);
    assert_eq!(doc.agent(AgentId::TestWriter).status, AgentStatus::Pending);
    assert_eq!(doc.agent(AgentId::Planner).status, AgentStatus::Completed);
}

#[tokio::test]
async fn test_completion_of_non_responsible_agent_does_not_advance() {
    let temp_dir = TempDir::new().unwrap();
    let store = test_store(&temp_dir);
    workflow_in_phase(&store, Phase::Planning).await;
    store
        .update_agent_status(AgentId::Coder, AgentStatus::Completed, None)
        .await
        .unwrap();

    let mut monitor = WorkflowMonitor::new(store.clone(), fast_config());
    let report = monitor.tick().await.unwrap();

    assert_eq!(report.advance, None);
    assert_eq!(store.get_workflow_phase().await.unwrap(), Phase::Planning);
}

#[tokio::test]
async fn test_full_pipeline_reaches_complete() {
    let temp_dir = TempDir::new().unwrap();
    let store = test_store(&temp_dir);
    store.start_new_workflow(vec!["req".into()], "pipeline").await.unwrap();
    let mut monitor = WorkflowMonitor::new(store.clone(), fast_config());

    let mut phases = vec![store.get_workflow_phase().await.unwrap()];
    for agent in AgentId::ALL {
        assert_eq!(store.get_agent_status(agent).await.unwrap().status, AgentStatus::Pending);
        store
            .update_agent_status(agent, AgentStatus::Completed, None)
            .await
            .unwrap();
        monitor.tick().await.unwrap();
        phases.push(store.get_workflow_phase().await.unwrap());
    }

    assert_eq!(phases, Phase::PIPELINE.to_vec());
    assert_eq!(monitor.tick().await.unwrap().outcome, TickOutcome::Completed);
}

#[tokio::test]
async fn test_three_stalls_fail_agent_with_single_error() {
    let temp_dir = TempDir::new().unwrap();
    let store = test_store(&temp_dir);
    workflow_in_phase(&store, Phase::Coding).await;
    let mut monitor = WorkflowMonitor::new(store.clone(), fast_config());

    stall(&store, AgentId::Coder, 601).await;
    let report = monitor.tick().await.unwrap();
    assert_eq!(
        report.stalls[0].action,
        StallAction::Retried {
            attempt: 1,
            max_retries: 2
        }
    );
    assert_eq!(
        store.get_agent_status(AgentId::Coder).await.unwrap().status,
        AgentStatus::Pending
    );

    stall(&store, AgentId::Coder, 601).await;
    let report = monitor.tick().await.unwrap();
    assert_eq!(
        report.stalls[0].action,
        StallAction::Retried {
            attempt: 2,
            max_retries: 2
        }
    );

    stall(&store, AgentId::Coder, 601).await;
    let report = monitor.tick().await.unwrap();
    assert_eq!(report.stalls[0].action, StallAction::Failed { retries: 2 });
    assert_eq!(
        report.outcome,
        TickOutcome::Failed {
            agents: vec![AgentId::Coder]
        }
    );

    let doc = store.read().await.unwrap();
    assert_eq!(doc.agent(AgentId::Coder).status, AgentStatus::Failed);
    assert_eq!(doc.errors.len(), 1);
    assert_eq!(doc.errors[0].agent, AgentId::Coder);

    // Further ticks report the failure but never add more error records
    let report = monitor.tick().await.unwrap();
    assert!(report.stalls.is_empty());
    assert!(matches!(report.outcome, TickOutcome::Failed { .. }));
    assert_eq!(store.read().await.unwrap().errors.len(), 1);
}

#[tokio::test]
async fn test_agent_within_timeout_is_not_stalled() {
    let temp_dir = TempDir::new().unwrap();
    let store = test_store(&temp_dir);
    workflow_in_phase(&store, Phase::Coding).await;
    let mut monitor = WorkflowMonitor::new(store.clone(), fast_config());

    // Coder gets 600s, so 400s of silence is fine even though the planner would stall
    stall(&store, AgentId::Coder, 400).await;
    let report = monitor.tick().await.unwrap();

    assert!(report.stalls.is_empty());
    assert_eq!(
        store.get_agent_status(AgentId::Coder).await.unwrap().status,
        AgentStatus::InProgress
    );
}

#[tokio::test]
async fn test_heartbeat_prevents_stall() {
    let temp_dir = TempDir::new().unwrap();
    let store = test_store(&temp_dir);
    workflow_in_phase(&store, Phase::Review).await;
    let mut monitor = WorkflowMonitor::new(store.clone(), fast_config());

    stall(&store, AgentId::Reviewer, 900).await;
    store.touch_agent(AgentId::Reviewer).await.unwrap();
    let report = monitor.tick().await.unwrap();

    assert!(report.stalls.is_empty());
    assert_eq!(monitor.retry_count(AgentId::Reviewer), 0);
}

#[tokio::test]
async fn test_in_progress_without_timestamp_is_not_stalled() {
    let temp_dir = TempDir::new().unwrap();
    let store = test_store(&temp_dir);
    workflow_in_phase(&store, Phase::Planning).await;
    store
        .update(|mut doc| {
            doc.agents.planner.status = AgentStatus::InProgress;
            doc.agents.planner.last_update = None;
            doc
        })
        .await
        .unwrap();

    let mut monitor = WorkflowMonitor::new(store.clone(), fast_config());
    let report = monitor.tick().await.unwrap();

    assert!(report.stalls.is_empty());
}

#[tokio::test]
async fn test_retry_budget_resets_on_new_iteration() {
    let temp_dir = TempDir::new().unwrap();
    let store = test_store(&temp_dir);
    workflow_in_phase(&store, Phase::Coding).await;
    let mut monitor = WorkflowMonitor::new(store.clone(), fast_config());

    for _ in 0..2 {
        stall(&store, AgentId::Coder, 601).await;
        monitor.tick().await.unwrap();
    }
    assert_eq!(monitor.retry_count(AgentId::Coder), 2);

    workflow_in_phase(&store, Phase::Coding).await;
    stall(&store, AgentId::Coder, 601).await;
    let report = monitor.tick().await.unwrap();

    assert_eq!(
        report.stalls[0].action,
        StallAction::Retried {
            attempt: 1,
            max_retries: 2
        }
    );
}

#[tokio::test]
async fn test_forced_reset_then_start_gets_fresh_retry_budget() {
    let temp_dir = TempDir::new().unwrap();
    let store = test_store(&temp_dir);
    workflow_in_phase(&store, Phase::Coding).await;
    let mut monitor = WorkflowMonitor::new(store.clone(), fast_config());

    for _ in 0..2 {
        stall(&store, AgentId::Coder, 601).await;
        monitor.tick().await.unwrap();
    }
    assert_eq!(monitor.retry_count(AgentId::Coder), 2);
    let before = store.read().await.unwrap().phase.iteration;

    // The monitor never ticks between the reset and the new start
    store.initialize(true).await.unwrap();
    workflow_in_phase(&store, Phase::Coding).await;
    assert!(store.read().await.unwrap().phase.iteration > before);

    stall(&store, AgentId::Coder, 601).await;
    let report = monitor.tick().await.unwrap();

    assert_eq!(
        report.stalls[0].action,
        StallAction::Retried {
            attempt: 1,
            max_retries: 2
        }
    );
    assert_eq!(
        store.get_agent_status(AgentId::Coder).await.unwrap().status,
        AgentStatus::Pending
    );
}

#[tokio::test]
async fn test_status_changes_reported_once() {
    let temp_dir = TempDir::new().unwrap();
    let store = test_store(&temp_dir);
    store.start_new_workflow(vec!["req".into()], "notify").await.unwrap();
    let mut monitor = WorkflowMonitor::new(store.clone(), fast_config());

    let first = monitor.tick().await.unwrap();
    assert_eq!(first.status_changes.len(), AgentId::ALL.len());

    let second = monitor.tick().await.unwrap();
    assert!(second.status_changes.is_empty());

    store
        .update_agent_status(AgentId::Planner, AgentStatus::InProgress, None)
        .await
        .unwrap();
    let third = monitor.tick().await.unwrap();
    assert_eq!(third.status_changes.len(), 1);
    assert_eq!(third.status_changes[0].agent, AgentId::Planner);
    assert_eq!(third.status_changes[0].previous, Some(AgentStatus::Pending));
    assert_eq!(third.status_changes[0].current, AgentStatus::InProgress);
}

#[tokio::test]
async fn test_failure_waits_for_in_progress_agents() {
    let temp_dir = TempDir::new().unwrap();
    let store = test_store(&temp_dir);
    workflow_in_phase(&store, Phase::Coding).await;
    store.fail_agent(AgentId::TestWriter, "broken tests").await.unwrap();
    store
        .update_agent_status(AgentId::Coder, AgentStatus::InProgress, None)
        .await
        .unwrap();
    let mut monitor = WorkflowMonitor::new(store.clone(), fast_config());

    assert_eq!(monitor.tick().await.unwrap().outcome, TickOutcome::Continue);

    store
        .update_agent_status(AgentId::Coder, AgentStatus::Pending, None)
        .await
        .unwrap();
    assert_eq!(
        monitor.tick().await.unwrap().outcome,
        TickOutcome::Failed {
            agents: vec![AgentId::TestWriter]
        }
    );
}

#[tokio::test]
async fn test_run_until_complete() {
    let temp_dir = TempDir::new().unwrap();
    let store = test_store(&temp_dir);
    workflow_in_phase(&store, Phase::Review).await;
    store
        .update_agent_status(AgentId::Reviewer, AgentStatus::Completed, None)
        .await
        .unwrap();

    let mut monitor = WorkflowMonitor::new(store.clone(), fast_config());
    let outcome = tokio::time::timeout(Duration::from_secs(10), monitor.run(CancellationToken::new()))
        .await
        .unwrap();

    assert_eq!(outcome, MonitorOutcome::Completed);
    assert_eq!(store.get_workflow_phase().await.unwrap(), Phase::Complete);
}

#[tokio::test]
async fn test_run_honors_cancellation() {
    let temp_dir = TempDir::new().unwrap();
    let store = test_store(&temp_dir);
    store.start_new_workflow(vec!["req".into()], "cancel").await.unwrap();

    let config = MonitorConfig {
        poll_interval_secs: 60,
        ..MonitorConfig::default()
    };
    let mut monitor = WorkflowMonitor::new(store.clone(), config);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let outcome = tokio::time::timeout(Duration::from_secs(10), monitor.run(cancel))
        .await
        .unwrap();

    assert_eq!(outcome, MonitorOutcome::Cancelled);
}

#[tokio::test]
async fn test_run_survives_unreadable_document() {
    let temp_dir = TempDir::new().unwrap();
    let store = test_store(&temp_dir);
    std::fs::write(store.state_path(), "{ truncated").unwrap();

    let mut monitor = WorkflowMonitor::new(store.clone(), fast_config());
    assert!(monitor.tick().await.unwrap_err().is_transient());

    let path = store.state_path().to_path_buf();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut doc = WorkflowDocument::new(Utc::now());
        doc.set_phase(Phase::Complete, Utc::now());
        let tmp = path.with_extension("repair");
        std::fs::write(&tmp, serde_json::to_string_pretty(&doc).unwrap()).unwrap();
        std::fs::rename(&tmp, &path).unwrap();
    });

    let outcome = tokio::time::timeout(Duration::from_secs(10), monitor.run(CancellationToken::new()))
        .await
        .unwrap();

    assert_eq!(outcome, MonitorOutcome::Completed);
}

#[tokio::test]
async fn test_summary_does_not_mutate_document() {
    let temp_dir = TempDir::new().unwrap();
    let store = test_store(&temp_dir);
    workflow_in_phase(&store, Phase::Coding).await;
    store.add_error(AgentId::Coder, "compile error").await.unwrap();
    let before = std::fs::read(store.state_path()).unwrap();

    let monitor = WorkflowMonitor::new(store.clone(), fast_config());
    let summary = monitor.summary().await.unwrap();

    assert!(summary.contains("Project: monitor-test"));
    assert!(summary.contains("coder: compile error"));
    assert_eq!(std::fs::read(store.state_path()).unwrap(), before);
}

#[tokio::test]
async fn test_run_keeps_polling_through_lock_timeouts() {
    let temp_dir = TempDir::new().unwrap();
    let store = StateStore::new(StoreConfig {
        state_file: temp_dir.path().join("agent-state.json"),
        lock_timeout_ms: 20,
        lock_poll_interval_ms: 5,
    });
    workflow_in_phase(&store, Phase::Review).await;
    store
        .update_agent_status(AgentId::Reviewer, AgentStatus::Completed, None)
        .await
        .unwrap();

    // Another process holds the lock until told to let go
    let (acquired_tx, acquired_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let lock_path = store.lock_path().to_path_buf();
    let holder = std::thread::spawn(move || {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)
            .unwrap();
        let mut lock = RwLock::new(file);
        let _guard = lock.try_write().unwrap();
        acquired_tx.send(()).unwrap();
        let _ = release_rx.recv();
    });
    acquired_rx.recv().unwrap();

    let mut monitor = WorkflowMonitor::new(store.clone(), fast_config());
    let err = monitor.tick().await.unwrap_err();
    assert!(matches!(err, StoreError::LockTimeout { .. }));
    assert!(!err.is_transient());

    let run = tokio::spawn(async move { monitor.run(CancellationToken::new()).await });
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!run.is_finished());

    release_tx.send(()).unwrap();
    holder.join().unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, MonitorOutcome::Completed);
    assert_eq!(store.get_workflow_phase().await.unwrap(), Phase::Complete);
}
