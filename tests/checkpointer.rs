//! Checkpoint store contracts: in-memory and sqlite backends, plus the
//! persisted JSON shapes.

use chrono::Utc;
use phaseloom::node::{ErrorKind, ErrorRecord, ExecutionStatus, NodeExecution};
use phaseloom::runtime::persistence::PersistedCheckpoint;
use phaseloom::runtime::{Checkpoint, CheckpointStore, InMemoryCheckpointStore};
use phaseloom::state::{StatePatch, WorkflowState};
use phaseloom::types::{NodeId, RunStatus};
use serde_json::json;

fn sample_checkpoint(run_id: &str, step: u64, status: RunStatus) -> Checkpoint {
    let mut state = WorkflowState::with_input(StatePatch::new().with("task", json!("demo")));
    for s in 0..step {
        state
            .apply(&[(
                NodeId::Named("analyze".into()),
                StatePatch::new().with(format!("step{s}"), json!(s)),
            )])
            .unwrap();
    }
    let history = (1..=step)
        .map(|s| NodeExecution {
            node: NodeId::Named("analyze".into()),
            step: s,
            status: ExecutionStatus::Success,
            attempts: 1,
            elapsed_ms: 7,
            error: None,
        })
        .collect();
    Checkpoint {
        run_id: run_id.to_string(),
        step,
        state,
        history,
        status,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn in_memory_roundtrip_returns_latest_step() {
    let store = InMemoryCheckpointStore::new();
    store
        .save(sample_checkpoint("run-a", 0, RunStatus::Pending))
        .await
        .unwrap();
    store
        .save(sample_checkpoint("run-a", 1, RunStatus::Running))
        .await
        .unwrap();
    store
        .save(sample_checkpoint("run-a", 2, RunStatus::Running))
        .await
        .unwrap();

    let latest = store.load_latest("run-a").await.unwrap().unwrap();
    assert_eq!(latest.step, 2);
    assert_eq!(latest.history.len(), 2);
    assert!(store.load_latest("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn in_memory_lists_steps_in_order() {
    let store = InMemoryCheckpointStore::new();
    // Save out of order; listing is by step ascending.
    for step in [1, 0, 2] {
        store
            .save(sample_checkpoint("run-a", step, RunStatus::Running))
            .await
            .unwrap();
    }
    let steps: Vec<u64> = store
        .list_steps("run-a")
        .await
        .unwrap()
        .iter()
        .map(|m| m.step)
        .collect();
    assert_eq!(steps, vec![0, 1, 2]);
}

#[tokio::test]
async fn saving_a_step_again_replaces_it() {
    let store = InMemoryCheckpointStore::new();
    store
        .save(sample_checkpoint("run-a", 1, RunStatus::Running))
        .await
        .unwrap();
    store
        .save(sample_checkpoint("run-a", 1, RunStatus::Failed))
        .await
        .unwrap();

    let steps = store.list_steps("run-a").await.unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].status, RunStatus::Failed);
}

#[tokio::test]
async fn list_runs_covers_every_saved_run() {
    let store = InMemoryCheckpointStore::new();
    store
        .save(sample_checkpoint("run-b", 0, RunStatus::Pending))
        .await
        .unwrap();
    store
        .save(sample_checkpoint("run-a", 0, RunStatus::Pending))
        .await
        .unwrap();
    assert_eq!(store.list_runs().await.unwrap(), vec!["run-a", "run-b"]);
}

#[test]
fn persisted_checkpoint_json_is_self_describing() {
    let mut checkpoint = sample_checkpoint("run-a", 1, RunStatus::Failed);
    checkpoint.history.push(NodeExecution {
        node: NodeId::Named("runTests".into()),
        step: 1,
        status: ExecutionStatus::Failure,
        attempts: 3,
        elapsed_ms: 90,
        error: Some(ErrorRecord::new(ErrorKind::Transient, "flaky suite", true)),
    });

    let persisted = PersistedCheckpoint::from(&checkpoint);
    let json = serde_json::to_value(&persisted).unwrap();

    // The stored shape is readable without this crate's types.
    assert_eq!(json["status"], json!("failed"));
    assert_eq!(json["history"][1]["node"], json!("runTests"));
    assert_eq!(json["history"][1]["error"]["kind"], json!("transient"));

    let back: PersistedCheckpoint = serde_json::from_value(json).unwrap();
    let restored = Checkpoint::try_from(back).unwrap();
    assert_eq!(restored.state, checkpoint.state);
    assert_eq!(restored.history, checkpoint.history);
    assert_eq!(restored.status, checkpoint.status);
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use phaseloom::runtime::SqliteCheckpointStore;

    #[tokio::test]
    async fn sqlite_roundtrip_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.db");
        let store = SqliteCheckpointStore::open(path.to_str().unwrap())
            .await
            .unwrap();

        store
            .save(sample_checkpoint("run-a", 0, RunStatus::Pending))
            .await
            .unwrap();
        store
            .save(sample_checkpoint("run-a", 1, RunStatus::Running))
            .await
            .unwrap();
        store
            .save(sample_checkpoint("run-b", 0, RunStatus::Pending))
            .await
            .unwrap();

        let latest = store.load_latest("run-a").await.unwrap().unwrap();
        assert_eq!(latest.step, 1);
        assert_eq!(latest.status, RunStatus::Running);
        assert_eq!(latest.state.get("task"), Some(&json!("demo")));
        assert_eq!(latest.history.len(), 1);

        let steps: Vec<u64> = store
            .list_steps("run-a")
            .await
            .unwrap()
            .iter()
            .map(|m| m.step)
            .collect();
        assert_eq!(steps, vec![0, 1]);
        assert_eq!(store.list_runs().await.unwrap(), vec!["run-a", "run-b"]);
        assert!(store.load_latest("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sqlite_replaces_same_step() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replace.db");
        let store = SqliteCheckpointStore::open(path.to_str().unwrap())
            .await
            .unwrap();

        store
            .save(sample_checkpoint("run-a", 2, RunStatus::Running))
            .await
            .unwrap();
        store
            .save(sample_checkpoint("run-a", 2, RunStatus::Succeeded))
            .await
            .unwrap();

        let steps = store.list_steps("run-a").await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].status, RunStatus::Succeeded);
    }
}
