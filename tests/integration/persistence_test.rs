// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pricetier::domain::models::metrics::{MetricsSnapshot, SchedulerState};
use pricetier::domain::models::state::PersistedState;
use pricetier::domain::models::tier::TierExecutionState;
use pricetier::domain::repositories::state_repository::{StateRepository, StorageError};
use pricetier::infrastructure::storage::{InMemoryStore, JsonFileStore};
use pricetier::queue::scheduler::SchedulerConfig;

use super::helpers::{builder, fast_config, scheduler, tier, Behavior, ScriptedExecutor};

fn quick() -> Arc<ScriptedExecutor> {
    Arc::new(ScriptedExecutor::new(Behavior::Succeed, Duration::from_millis(1)))
}

fn file_store(dir: &tempfile::TempDir) -> Arc<JsonFileStore> {
    Arc::new(JsonFileStore::new(
        dir.path().join("scheduler_state.json"),
        dir.path().join("scheduler_metrics.json"),
    ))
}

#[tokio::test]
async fn test_restore_reloads_tier_state() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir);

    let mut state = PersistedState::default();
    state.tier_executions.insert(
        "tracking".to_string(),
        TierExecutionState {
            executions_today: 7,
            success_rate: 0.86,
            ..Default::default()
        },
    );
    state.tier_executions.insert(
        "retired".to_string(),
        TierExecutionState {
            executions_today: 99,
            ..Default::default()
        },
    );
    state.randomization_state.pattern_break_counter = 4;
    store.save_state(&state).await.unwrap();

    let scheduler = builder(vec![tier("tracking", &["paris"], 1)], fast_config(1, 1, 0))
        .with_store(store)
        .build()
        .unwrap();

    assert!(scheduler.restore_state().await);

    let tracking = scheduler.tier_state("tracking").unwrap();
    assert_eq!(tracking.executions_today, 7);
    assert!((tracking.success_rate - 0.86).abs() < 1e-9);
    assert!(scheduler.tier_state("retired").is_none());
    assert_eq!(scheduler.status().tiers.pattern_break_counter, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let tiers = || vec![tier("critical", &["paris", "ripley"], 2)];

    let first = builder(tiers(), fast_config(2, 1, 0))
        .with_executor(quick())
        .with_store(file_store(&dir))
        .build()
        .unwrap();
    first.schedule_tier_now("critical").unwrap();
    first.start().await.unwrap();
    assert!(first.wait_until_drained(Duration::from_secs(10)).await);
    first.stop().await.unwrap();

    let before = first.tier_state("critical").unwrap();
    assert_eq!(before.executions_today, 2);
    assert!(dir.path().join("scheduler_state.json").exists());

    let second = builder(tiers(), fast_config(2, 1, 0))
        .with_store(file_store(&dir))
        .build()
        .unwrap();
    assert!(second.restore_state().await);

    let after = second.tier_state("critical").unwrap();
    assert_eq!(after.executions_today, before.executions_today);
    assert!((after.success_rate - before.success_rate).abs() < 1e-9);
    assert_eq!(after.last_run, before.last_run);
    assert_eq!(after.next_scheduled, before.next_scheduled);
    assert_eq!(after.products_extracted_total, 24);
}

#[tokio::test]
async fn test_malformed_state_file_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("scheduler_state.json"), b"{ \"tier_executions\": [").unwrap();

    let scheduler = builder(vec![tier("bulk", &["hites"], 1)], fast_config(1, 1, 0))
        .with_executor(quick())
        .with_store(file_store(&dir))
        .build()
        .unwrap();

    assert!(!scheduler.restore_state().await);
    assert_eq!(
        scheduler.tier_state("bulk").unwrap(),
        TierExecutionState::default()
    );

    scheduler.start().await.unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Running);
    scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_writes_metrics_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = builder(vec![tier("bulk", &["hites"], 1)], fast_config(1, 1, 0))
        .with_executor(quick())
        .with_store(file_store(&dir))
        .build()
        .unwrap();

    scheduler.start().await.unwrap();
    scheduler.stop().await.unwrap();

    let raw = std::fs::read(dir.path().join("scheduler_metrics.json")).unwrap();
    let snapshot: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert!(snapshot.get("timestamp").is_some());
    assert_eq!(snapshot["state"], "paused");
    assert!(snapshot.get("metrics").is_some());
}

#[tokio::test]
async fn test_in_memory_store_receives_state_on_stop() {
    let store = Arc::new(InMemoryStore::new());
    let scheduler = builder(vec![tier("bulk", &["hites"], 1)], fast_config(1, 1, 0))
        .with_executor(quick())
        .with_store(store.clone())
        .build()
        .unwrap();

    scheduler.start().await.unwrap();
    scheduler.stop().await.unwrap();

    let state = store.state().await.unwrap();
    assert!(state.tier_executions.contains_key("bulk"));
    assert!(state.randomization_state.last_identity_rotation.is_some());
    assert_eq!(store.metrics().await.len(), 1);
}

#[tokio::test]
async fn test_scheduler_without_store_persists_nothing() {
    let scheduler = scheduler(
        vec![tier("bulk", &["hites"], 1)],
        fast_config(1, 1, 0),
        quick(),
    );
    assert!(!scheduler.restore_state().await);
    scheduler.persist_state().await.unwrap();
}

/// 写入总是失败的存储，统计写入尝试次数
#[derive(Default)]
struct FullDisk {
    state_writes: AtomicUsize,
    metrics_writes: AtomicUsize,
}

#[async_trait]
impl StateRepository for FullDisk {
    async fn load_state(&self) -> Result<Option<PersistedState>, StorageError> {
        Ok(None)
    }

    async fn save_state(&self, _state: &PersistedState) -> Result<(), StorageError> {
        self.state_writes.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Other("disk full".to_string()))
    }

    async fn save_metrics(&self, _snapshot: &MetricsSnapshot) -> Result<(), StorageError> {
        self.metrics_writes.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Other("disk full".to_string()))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_succeeds_when_state_cannot_be_written() {
    let store = Arc::new(FullDisk::default());
    let executor = quick();
    let scheduler = builder(vec![tier("alpha", &["paris"], 1)], fast_config(2, 1, 0))
        .with_executor(executor.clone())
        .with_store(store.clone())
        .build()
        .unwrap();

    scheduler.schedule_tier_now("alpha").unwrap();
    scheduler.start().await.unwrap();
    assert!(scheduler.wait_until_drained(Duration::from_secs(10)).await);

    assert!(scheduler.stop().await.is_ok());
    assert_eq!(scheduler.state(), SchedulerState::Paused);
    assert!(store.state_writes.load(Ordering::SeqCst) >= 1);
    assert!(store.metrics_writes.load(Ordering::SeqCst) >= 1);
    assert_eq!(executor.calls(), 1);

    // 显式保存仍然把错误交给调用方
    assert!(scheduler.persist_state().await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_metrics_loop_survives_write_failures() {
    let store = Arc::new(FullDisk::default());
    let config = SchedulerConfig {
        metrics_interval: Duration::from_millis(10),
        ..fast_config(2, 1, 0)
    };
    let scheduler = builder(vec![tier("alpha", &["paris"], 1)], config)
        .with_executor(quick())
        .with_store(store.clone())
        .build()
        .unwrap();

    scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(store.metrics_writes.load(Ordering::SeqCst) >= 3);
    assert_eq!(scheduler.state(), SchedulerState::Running);
    assert!(scheduler.is_running().await);

    scheduler.stop().await.unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Paused);
}

#[tokio::test]
async fn test_restore_keeps_counters_despite_bad_history_entry() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir);
    std::fs::write(
        store.state_path(),
        r#"{
            "tier_executions": {"alpha": {"executions_today": 6, "success_rate": 0.9}},
            "execution_history": [{"task_id": "paris_cat0_deadbeef", "success": true}]
        }"#,
    )
    .unwrap();

    let scheduler = builder(vec![tier("alpha", &["paris"], 1)], fast_config(2, 1, 0))
        .with_executor(quick())
        .with_store(store)
        .build()
        .unwrap();

    assert!(scheduler.restore_state().await);
    let alpha = scheduler.tier_state("alpha").unwrap();
    assert_eq!(alpha.executions_today, 6);
    assert!((alpha.success_rate - 0.9).abs() < 1e-9);
}
