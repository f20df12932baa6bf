// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use std::time::Duration;

use pricetier::domain::models::metrics::SchedulerState;
use pricetier::domain::models::task::{FailureCause, TaskStatus};
use pricetier::engines::simulated::SimulatedExecutor;
use pricetier::queue::core::SchedulingOutcome;
use pricetier::queue::scheduler::IntelligentScheduler;
use pricetier::utils::random::SharedRng;

use super::helpers::{builder, fast_config, scheduler, tier, Behavior, ScriptedExecutor};

/// 在队列清空前持续采样运行中的任务数，返回观察到的最大值
async fn drain_sampling_running(scheduler: &IntelligentScheduler) -> usize {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let mut max_seen = 0;
    while !scheduler.core().is_drained() && tokio::time::Instant::now() < deadline {
        max_seen = max_seen.max(scheduler.status().queues.running);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    max_seen
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_retry_exhaustion_runs_exactly_r_plus_one_attempts() {
    let executor = Arc::new(ScriptedExecutor::new(
        Behavior::Fail(FailureCause::Network),
        Duration::from_millis(5),
    ));
    let scheduler = scheduler(
        vec![tier("alpha", &["paris"], 1)],
        fast_config(3, 1, 2),
        executor.clone(),
    );

    assert_eq!(scheduler.schedule_tier_now("alpha").unwrap(), 1);
    scheduler.start().await.unwrap();
    assert!(scheduler.wait_until_drained(Duration::from_secs(10)).await);
    scheduler.stop().await.unwrap();

    assert_eq!(executor.calls(), 3);

    let completed = scheduler.completed_tasks();
    assert_eq!(completed.len(), 1);
    let task = &completed[0];
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempts, 3);
    assert_eq!(task.retries_remaining, 0);

    let metrics = scheduler.status().metrics;
    assert_eq!(metrics.total_tasks_executed, 3);
    assert_eq!(metrics.failed_attempts, 3);
    assert_eq!(metrics.retries_scheduled, 2);
    assert_eq!(metrics.terminally_failed_tasks, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rejected_failure_is_not_retried() {
    let executor = Arc::new(ScriptedExecutor::new(
        Behavior::Fail(FailureCause::Rejected),
        Duration::from_millis(1),
    ));
    let scheduler = scheduler(
        vec![tier("alpha", &["paris"], 1)],
        fast_config(3, 1, 3),
        executor.clone(),
    );

    scheduler.schedule_tier_now("alpha").unwrap();
    scheduler.start().await.unwrap();
    assert!(scheduler.wait_until_drained(Duration::from_secs(10)).await);
    scheduler.stop().await.unwrap();

    assert_eq!(executor.calls(), 1);
    assert_eq!(scheduler.completed_tasks()[0].retries_remaining, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_global_concurrency_cap() {
    let executor = Arc::new(ScriptedExecutor::new(
        Behavior::Succeed,
        Duration::from_millis(100),
    ));
    let scheduler = scheduler(
        vec![tier(
            "alpha",
            &["falabella", "paris", "ripley", "hites", "abcdin"],
            5,
        )],
        fast_config(2, 1, 0),
        executor.clone(),
    );

    assert_eq!(scheduler.schedule_tier_now("alpha").unwrap(), 5);
    scheduler.start().await.unwrap();
    let max_sampled = drain_sampling_running(&scheduler).await;
    scheduler.stop().await.unwrap();

    assert_eq!(executor.calls(), 5);
    assert!(max_sampled <= 2, "sampled {} running tasks", max_sampled);
    assert!(executor.max_running() <= 2);
    assert_eq!(executor.max_running(), 2);
    assert_eq!(scheduler.status().metrics.successful_tasks, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_per_target_concurrency_cap() {
    let executor = Arc::new(ScriptedExecutor::new(
        Behavior::Succeed,
        Duration::from_millis(30),
    ));
    let scheduler = scheduler(
        vec![tier("alpha", &["paris", "paris", "paris", "ripley"], 4)],
        fast_config(3, 1, 0),
        executor.clone(),
    );

    scheduler.schedule_tier_now("alpha").unwrap();
    scheduler.start().await.unwrap();
    assert!(scheduler.wait_until_drained(Duration::from_secs(10)).await);
    scheduler.stop().await.unwrap();

    assert_eq!(executor.calls(), 4);
    assert_eq!(executor.max_per_retailer(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tier_concurrency_cap() {
    let executor = Arc::new(ScriptedExecutor::new(
        Behavior::Succeed,
        Duration::from_millis(30),
    ));
    let scheduler = scheduler(
        vec![tier("tracking", &["paris", "ripley", "hites"], 1)],
        fast_config(3, 1, 0),
        executor.clone(),
    );

    scheduler.schedule_tier_now("tracking").unwrap();
    scheduler.start().await.unwrap();
    assert!(scheduler.wait_until_drained(Duration::from_secs(10)).await);
    scheduler.stop().await.unwrap();

    assert_eq!(executor.calls(), 3);
    assert_eq!(executor.max_running(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_callback_timeout_becomes_timeout_failure() {
    let executor = Arc::new(ScriptedExecutor::new(
        Behavior::Succeed,
        Duration::from_millis(500),
    ));
    let mut config = fast_config(1, 1, 0);
    config.task_timeout = Some(Duration::from_millis(20));
    let scheduler = scheduler(vec![tier("alpha", &["paris"], 1)], config, executor);

    scheduler.schedule_tier_now("alpha").unwrap();
    scheduler.start().await.unwrap();
    assert!(scheduler.wait_until_drained(Duration::from_secs(10)).await);
    scheduler.stop().await.unwrap();

    let task = &scheduler.completed_tasks()[0];
    assert_eq!(task.status, TaskStatus::Failed);
    let failure = task.result.as_ref().and_then(|r| r.failure.as_ref()).unwrap();
    assert_eq!(failure.cause, FailureCause::Timeout);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panicking_callback_is_contained() {
    let executor = Arc::new(ScriptedExecutor::new(Behavior::Panic, Duration::from_millis(1)));
    let scheduler = scheduler(
        vec![tier("alpha", &["paris"], 1)],
        fast_config(1, 1, 1),
        executor.clone(),
    );

    scheduler.schedule_tier_now("alpha").unwrap();
    scheduler.start().await.unwrap();
    assert!(scheduler.wait_until_drained(Duration::from_secs(10)).await);
    assert_eq!(scheduler.state(), SchedulerState::Running);
    scheduler.stop().await.unwrap();

    assert_eq!(executor.calls(), 2);
    let task = &scheduler.completed_tasks()[0];
    let failure = task.result.as_ref().and_then(|r| r.failure.as_ref()).unwrap();
    assert_eq!(failure.cause, FailureCause::Internal);
    assert!(failure.message.contains("scripted panic"));
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let executor = Arc::new(ScriptedExecutor::new(Behavior::Succeed, Duration::from_millis(1)));
    let scheduler = scheduler(vec![tier("alpha", &["paris"], 1)], fast_config(1, 1, 0), executor);

    scheduler.stop().await.unwrap();
    scheduler.start().await.unwrap();
    scheduler.start().await.unwrap();
    assert!(scheduler.is_running().await);

    scheduler.stop().await.unwrap();
    scheduler.stop().await.unwrap();
    assert!(!scheduler.is_running().await);
    assert_eq!(scheduler.state(), SchedulerState::Paused);
}

#[tokio::test]
async fn test_run_until_stops_after_signal() {
    let executor = Arc::new(ScriptedExecutor::new(Behavior::Succeed, Duration::from_millis(1)));
    let scheduler = scheduler(vec![tier("alpha", &["paris"], 1)], fast_config(1, 1, 0), executor);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        scheduler.run_until(tokio::time::sleep(Duration::from_millis(50))),
    )
    .await;

    assert!(matches!(result, Ok(Ok(()))));
    assert_eq!(scheduler.state(), SchedulerState::Paused);
}

#[tokio::test]
async fn test_due_tier_is_scheduled_once_until_drained() {
    let executor = Arc::new(ScriptedExecutor::new(Behavior::Succeed, Duration::from_millis(1)));
    let scheduler = scheduler(
        vec![tier("alpha", &["paris", "ripley"], 1)],
        fast_config(1, 1, 0),
        executor,
    );

    match scheduler.schedule_next_batch().unwrap() {
        SchedulingOutcome::Scheduled { tier, tasks } => {
            assert_eq!(tier, "alpha");
            assert_eq!(tasks, 2);
        }
        other => panic!("expected a batch, got {:?}", other),
    }
    assert!(matches!(
        scheduler.schedule_next_batch().unwrap(),
        SchedulingOutcome::Idle { .. }
    ));
    assert_eq!(scheduler.status().queues.pending, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simulated_executor_path() {
    let executor = Arc::new(
        SimulatedExecutor::new(SharedRng::seeded(3))
            .with_duration(Duration::from_millis(1), Duration::from_millis(5)),
    );
    let scheduler = builder(vec![tier("alpha", &["paris", "ripley"], 2)], fast_config(2, 1, 0))
        .with_executor(executor)
        .build()
        .unwrap();

    scheduler.schedule_tier_now("alpha").unwrap();
    scheduler.start().await.unwrap();
    assert!(scheduler.wait_until_drained(Duration::from_secs(10)).await);
    scheduler.stop().await.unwrap();

    let status = scheduler.status();
    assert_eq!(status.metrics.successful_tasks, 2);
    assert!(status.metrics.total_products_scraped >= 30);
    assert_eq!(status.metrics.retailers_performance.len(), 2);
    assert!(scheduler
        .completed_tasks()
        .iter()
        .all(|t| t.status == TaskStatus::Completed));

    let state = scheduler.tier_state("alpha").unwrap();
    assert!(state.last_run.is_some());
    assert!(state.next_scheduled.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_drained_only_after_every_task_is_finalized() {
    let retailers = [
        "paris", "ripley", "hites", "lider", "falabella", "abcdin", "jumbo", "lapolar",
    ];
    let executor = Arc::new(ScriptedExecutor::new(Behavior::Succeed, Duration::from_millis(1)));
    let scheduler = Arc::new(scheduler(
        vec![tier("alpha", &retailers, 8)],
        fast_config(8, 1, 0),
        executor.clone(),
    ));
    assert_eq!(scheduler.schedule_tier_now("alpha").unwrap(), retailers.len());

    let watcher = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
            while tokio::time::Instant::now() < deadline {
                if scheduler.core().is_drained() {
                    return Some(scheduler.completed_tasks().len());
                }
                tokio::task::yield_now().await;
            }
            None
        })
    };

    scheduler.start().await.unwrap();
    let finalized_when_drained = watcher.await.unwrap();
    scheduler.stop().await.unwrap();

    assert_eq!(finalized_when_drained, Some(retailers.len()));
    assert_eq!(executor.calls(), retailers.len());
}
