// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset, NaiveDate, Timelike, Utc};
use futures::FutureExt;
use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::models::metrics::{
    MetricsSnapshot, QueueSizes, SchedulerMetrics, SchedulerState, StatusSnapshot,
};
use crate::domain::models::state::PersistedState;
use crate::domain::models::task::{
    ExecutionTask, FailureCause, ScrapeFailure, ScrapeReport, TaskResult,
};
use crate::domain::models::tier::TierExecutionState;
use crate::domain::repositories::state_repository::{StateRepository, StorageError};
use crate::domain::services::tier_manager::TierManager;
use crate::engines::anti_detection::AntiDetectionSystem;
use crate::engines::traits::{ScrapeExecutor, ScrapeRequest};
use crate::queue::resources::ResourceManager;
use crate::queue::scheduler::SchedulerConfig;
use crate::queue::task_queue::PendingQueue;
use crate::utils::clock::Clock;
use crate::utils::errors::{panic_message, SchedulerError};
use crate::utils::random::SharedRng;

/// 一次调度尝试的结果
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulingOutcome {
    /// 某个层级被展开为任务
    Scheduled { tier: String, tasks: usize },
    /// 没有到期层级，建议等待的时长
    Idle { wait: Duration },
}

/// 调度器内核
///
/// 持有层级管理器、反检测系统、待执行队列与资源计数。
/// 后台循环和门面类型都通过 `Arc<SchedulerCore>` 访问它；
/// 所有锁都只在同步代码段内持有，不会跨越 `.await`。
pub struct SchedulerCore {
    config: SchedulerConfig,
    tier_manager: Mutex<TierManager>,
    anti_detection: Arc<AntiDetectionSystem>,
    executor: Arc<dyn ScrapeExecutor>,
    store: Option<Arc<dyn StateRepository>>,
    rng: SharedRng,
    clock: Arc<dyn Clock>,
    pending: Mutex<PendingQueue>,
    resources: Mutex<ResourceManager>,
    running: Mutex<BTreeMap<String, ExecutionTask>>,
    in_flight: Mutex<HashMap<String, JoinHandle<()>>>,
    completed: Mutex<VecDeque<ExecutionTask>>,
    metrics: Mutex<SchedulerMetrics>,
    state: Mutex<SchedulerState>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    last_maintenance: Mutex<Option<NaiveDate>>,
}

impl SchedulerCore {
    pub(crate) fn new(
        config: SchedulerConfig,
        tier_manager: TierManager,
        anti_detection: Arc<AntiDetectionSystem>,
        executor: Arc<dyn ScrapeExecutor>,
        store: Option<Arc<dyn StateRepository>>,
        rng: SharedRng,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let tier_caps = tier_manager
            .tiers()
            .iter()
            .map(|t| (t.name().to_string(), t.max_concurrent()))
            .collect();
        let resources = ResourceManager::new(
            config.max_concurrent_global,
            config.max_concurrent_per_target,
            tier_caps,
        );

        Self {
            config,
            tier_manager: Mutex::new(tier_manager),
            anti_detection,
            executor,
            store,
            rng,
            clock,
            pending: Mutex::new(PendingQueue::new()),
            resources: Mutex::new(resources),
            running: Mutex::new(BTreeMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            completed: Mutex::new(VecDeque::new()),
            metrics: Mutex::new(SchedulerMetrics::default()),
            state: Mutex::new(SchedulerState::Idle),
            started_at: Mutex::new(None),
            last_maintenance: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn anti_detection(&self) -> &Arc<AntiDetectionSystem> {
        &self.anti_detection
    }

    pub fn executor_name(&self) -> &'static str {
        self.executor.name()
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: SchedulerState) {
        let mut current = self.state.lock();
        if *current != state {
            info!("Scheduler state {} -> {}", *current, state);
            *current = state;
        }
    }

    pub(crate) fn mark_started(&self) {
        *self.started_at.lock() = Some(self.clock.now());
        self.set_state(SchedulerState::Running);
    }

    fn accepting_work(&self) -> bool {
        matches!(
            self.state(),
            SchedulerState::Running | SchedulerState::Maintenance
        )
    }

    fn uptime(&self) -> chrono::Duration {
        match *self.started_at.lock() {
            Some(started) => self.clock.now() - started,
            None => chrono::Duration::zero(),
        }
    }

    /// 层级的当前运行状态
    pub fn tier_state(&self, tier: &str) -> Option<TierExecutionState> {
        self.tier_manager.lock().state(tier).cloned()
    }

    // ---------------------------------------------------------------
    // Scheduling
    // ---------------------------------------------------------------

    /// 选择下一个到期层级并将其展开为任务
    pub fn schedule_next_batch(&self) -> Result<SchedulingOutcome, SchedulerError> {
        let next = {
            let tier_manager = self.tier_manager.lock();
            match tier_manager.select_next_due_tier() {
                Some(tier) => Ok(tier.name().to_string()),
                None => Err(tier_manager.time_until_next_due()),
            }
        };

        match next {
            Ok(tier) => {
                let tasks = self.enqueue_tier(&tier, true)?;
                Ok(SchedulingOutcome::Scheduled { tier, tasks })
            }
            Err(until_due) => {
                let wait = until_due
                    .unwrap_or(self.config.idle_sleep_cap)
                    .clamp(self.config.idle_sleep_floor, self.config.idle_sleep_cap);
                Ok(SchedulingOutcome::Idle { wait })
            }
        }
    }

    /// 立即展开指定层级，不检查是否到期
    pub fn schedule_tier_now(&self, tier: &str) -> Result<usize, SchedulerError> {
        self.enqueue_tier(tier, false)
    }

    fn enqueue_tier(&self, tier: &str, pattern_breaking: bool) -> Result<usize, SchedulerError> {
        let now = self.clock.now();

        let (items, pause) = {
            let mut tier_manager = self.tier_manager.lock();
            let items = tier_manager.generate_schedule(tier, &self.anti_detection)?;
            let pause = if pattern_breaking {
                tier_manager.apply_pattern_breaking()
            } else {
                None
            };
            tier_manager.mark_batch_scheduled(tier, items.len());
            (items, pause)
        };

        if pause.is_some() {
            self.anti_detection.record_pattern_break();
        }
        let offset = pause
            .map(|p| chrono::Duration::milliseconds(p.as_millis() as i64))
            .unwrap_or_else(chrono::Duration::zero);

        let tasks: Vec<ExecutionTask> = items
            .into_iter()
            .map(|mut item| {
                item.scheduled_time += offset;
                let bundle = self.anti_detection.prepare_bundle(
                    item.randomization.identity.clone(),
                    self.config.assumed_total_pages,
                    item.pages_to_scrape,
                );
                ExecutionTask::from_item(item, bundle, self.config.retry.max_retries, now)
            })
            .collect();

        let count = tasks.len();
        let first = tasks.first().map(|t| t.scheduled_time);
        let last = tasks.last().map(|t| t.scheduled_time);
        {
            let mut pending = self.pending.lock();
            for task in tasks {
                debug!(
                    "Queued task {} ({} pages) at {}",
                    task.id, task.pages_to_scrape, task.scheduled_time
                );
                pending.push(task);
            }
            gauge!("scheduler_pending_tasks").set(pending.len() as f64);
        }

        counter!("scheduler_batches_total", "tier" => tier.to_string()).increment(1);
        if let (Some(first), Some(last)) = (first, last) {
            info!(
                "Scheduled {} tasks for tier {} between {} and {}",
                count,
                tier,
                first.format("%H:%M:%S"),
                last.format("%H:%M:%S")
            );
        }
        Ok(count)
    }

    /// 以每小时概率按经过的时间折算，决定是否进行一次会话休息
    pub fn maybe_session_break(&self, elapsed: Duration) -> Option<Duration> {
        let probability = (self.config.session_break_probability_per_hour
            * elapsed.as_secs_f64()
            / 3600.0)
            .min(1.0);
        if self.rng.chance(probability) {
            Some(self.anti_detection.session_break())
        } else {
            None
        }
    }

    // ---------------------------------------------------------------
    // Dispatch and execution
    // ---------------------------------------------------------------

    /// 尝试派发一个就绪任务
    ///
    /// # 返回值
    ///
    /// 派发成功返回 `true`；没有容量或没有就绪任务时返回 `false`
    pub fn try_dispatch_next(self: &Arc<Self>) -> bool {
        if !self.accepting_work() {
            return false;
        }
        let now = self.clock.now();

        let mut resources = self.resources.lock();
        if !resources.has_global_capacity() {
            return false;
        }
        let mut pending = self.pending.lock();
        let Some(task) =
            pending.take_next_ready(now, |t| resources.can_admit(&t.retailer, &t.tier))
        else {
            return false;
        };
        resources.try_acquire(&task.retailer, &task.tier);
        drop(resources);
        gauge!("scheduler_pending_tasks").set(pending.len() as f64);

        // pending stays locked until the handle is tracked so is_drained cannot
        // miss a task between the queue and in_flight
        let key = format!("{}#{}", task.id, task.attempts + 1);
        let core = Arc::clone(self);
        let mut in_flight = self.in_flight.lock();
        let handle = tokio::spawn({
            let key = key.clone();
            async move { core.execute_task(task, key).await }
        });
        in_flight.insert(key, handle);
        drop(in_flight);
        drop(pending);
        true
    }

    async fn execute_task(self: Arc<Self>, task: ExecutionTask, key: String) {
        let retailer = task.retailer.clone();
        let tier = task.tier.clone();

        match task.start(self.clock.now()) {
            Ok(task) => self.run_started(task).await,
            Err(e) => error!("Refusing to run task: {}", e),
        }

        self.resources.lock().release(&retailer, &tier);
        self.in_flight.lock().remove(&key);
    }

    async fn run_started(&self, mut task: ExecutionTask) {
        let proxy_rotation = self
            .tier_manager
            .lock()
            .tier(&task.tier)
            .map(|t| t.proxy_rotation())
            .unwrap_or(false);
        if task.anti_detection.proxy.is_none() {
            task.anti_detection.proxy = self.anti_detection.acquire_proxy(proxy_rotation).await;
        }

        {
            let mut running = self.running.lock();
            running.insert(task.id.clone(), task.clone());
            gauge!("scheduler_running_tasks").set(running.len() as f64);
        }
        info!(
            "Executing task {} (tier {}, attempt {}, {} pages, proxy {})",
            task.id,
            task.tier,
            task.attempts,
            task.pages_to_scrape,
            task.anti_detection
                .proxy
                .as_ref()
                .map(|p| p.id())
                .unwrap_or_else(|| "direct".to_string())
        );

        let request = ScrapeRequest::from(&task);
        let started = Instant::now();
        let outcome = self.invoke(&request).await;
        let elapsed = started.elapsed().as_secs_f64();

        {
            let mut running = self.running.lock();
            running.remove(&task.id);
            gauge!("scheduler_running_tasks").set(running.len() as f64);
        }

        self.settle(task, outcome, elapsed);
    }

    async fn invoke(&self, request: &ScrapeRequest) -> Result<ScrapeReport, ScrapeFailure> {
        let call = AssertUnwindSafe(self.executor.execute(request)).catch_unwind();
        let result = match self.config.task_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ScrapeFailure::new(
                        FailureCause::Timeout,
                        format!("scrape callback exceeded {:?}", limit),
                    ))
                }
            },
            None => call.await,
        };

        match result {
            Ok(outcome) => outcome,
            Err(payload) => Err(ScrapeFailure::new(
                FailureCause::Internal,
                format!("scrape callback panicked: {}", panic_message(payload)),
            )),
        }
    }

    fn settle(&self, task: ExecutionTask, outcome: Result<ScrapeReport, ScrapeFailure>, elapsed: f64) {
        let now = self.clock.now();
        let success = outcome.is_ok();
        let result = match outcome {
            Ok(report) => TaskResult::succeeded(&report, now),
            Err(failure) => TaskResult::failed(failure, elapsed, now),
        };

        self.anti_detection.record_request(success);
        if let Some(failure) = &result.failure {
            match failure.cause {
                FailureCause::Blocked => self.anti_detection.record_blocked(),
                FailureCause::Captcha => self.anti_detection.record_captcha(),
                FailureCause::Proxy => {
                    if let Some(proxy) = &task.anti_detection.proxy {
                        self.anti_detection
                            .record_proxy_failure(&proxy.id(), &failure.message);
                    }
                }
                _ => {}
            }
        }

        if let Err(e) = self.tier_manager.lock().record_completion(&task, &result) {
            error!("Failed to record completion for task {}: {}", task.id, e);
        }
        self.record_attempt(&task, &result);

        if success {
            let products = result.products_found;
            match task.complete(result) {
                Ok(task) => {
                    info!(
                        "Task {} completed: {} products in {:.1}s",
                        task.id, products, elapsed
                    );
                    self.finalize(task);
                }
                Err(e) => error!("Invalid completion: {}", e),
            }
            return;
        }

        let cause = result
            .failure
            .as_ref()
            .map(|f| f.cause)
            .unwrap_or(FailureCause::Internal);
        let message = result
            .failure
            .as_ref()
            .map(|f| f.message.clone())
            .unwrap_or_default();
        let task = match task.fail(result) {
            Ok(task) => task,
            Err(e) => {
                error!("Invalid failure transition: {}", e);
                return;
            }
        };

        if self.config.retry.should_retry(task.retries_remaining, cause) {
            let retry_at = self.config.retry.next_retry_time(now, &self.rng);
            let retries_left = task.retries_remaining.saturating_sub(1);
            match task.reschedule(retry_at) {
                Ok(task) => {
                    warn!(
                        "Task {} failed ({}: {}), retrying at {} ({} retries left)",
                        task.id,
                        cause,
                        message,
                        retry_at.format("%H:%M:%S%.3f"),
                        retries_left
                    );
                    self.metrics.lock().retries_scheduled += 1;
                    counter!("scheduler_retries_total", "tier" => task.tier.clone()).increment(1);
                    let mut pending = self.pending.lock();
                    pending.push(task);
                    gauge!("scheduler_pending_tasks").set(pending.len() as f64);
                }
                Err(e) => error!("Failed to reschedule task: {}", e),
            }
        } else {
            error!(
                "Task {} gave up after {} attempts ({}: {})",
                task.id, task.attempts, cause, message
            );
            self.metrics.lock().terminally_failed_tasks += 1;
            counter!("scheduler_tasks_given_up_total", "tier" => task.tier.clone()).increment(1);
            self.finalize(task);
        }
    }

    fn record_attempt(&self, task: &ExecutionTask, result: &TaskResult) {
        let outcome = if result.success { "success" } else { "failure" };
        counter!("scheduler_tasks_total", "tier" => task.tier.clone(), "outcome" => outcome)
            .increment(1);
        histogram!("scheduler_task_duration_seconds", "tier" => task.tier.clone())
            .record(result.execution_secs);

        let mut metrics = self.metrics.lock();
        metrics.total_tasks_executed += 1;
        if result.success {
            metrics.successful_tasks += 1;
            metrics.total_products_scraped += u64::from(result.products_found);
            counter!("scheduler_products_total", "retailer" => task.retailer.clone())
                .increment(u64::from(result.products_found));
        } else {
            metrics.failed_attempts += 1;
        }

        let retailer = metrics
            .retailers_performance
            .entry(task.retailer.clone())
            .or_default();
        retailer.tasks_executed += 1;
        retailer.avg_execution_secs += (result.execution_secs - retailer.avg_execution_secs)
            / retailer.tasks_executed as f64;
        if result.success {
            retailer.successful_tasks += 1;
            retailer.avg_products_per_task += (f64::from(result.products_found)
                - retailer.avg_products_per_task)
                / retailer.successful_tasks as f64;
            retailer.last_successful_execution = Some(result.finished_at);
        }
        retailer.success_rate = retailer.successful_tasks as f64 / retailer.tasks_executed as f64;

        let tier = metrics.tiers_performance.entry(task.tier.clone()).or_default();
        tier.tasks_executed += 1;
        tier.tasks_today += 1;
        if result.success {
            tier.successful_tasks += 1;
            tier.products_scraped += u64::from(result.products_found);
        }
    }

    /// 任务到达终态：释放层级批次占位并写入历史
    fn finalize(&self, task: ExecutionTask) {
        self.tier_manager.lock().release_task(&task.tier);

        let mut completed = self.completed.lock();
        completed.push_back(task);
        if completed.len() > self.config.history_cap {
            let excess = completed.len() - self.config.history_trim_to;
            completed.drain(..excess);
            debug!("Trimmed {} entries from completed history", excess);
        }
    }

    /// 已完成任务的历史
    pub fn completed_tasks(&self) -> Vec<ExecutionTask> {
        self.completed.lock().iter().cloned().collect()
    }

    /// 队列、运行中任务和在途句柄是否都已清空
    pub fn is_drained(&self) -> bool {
        self.pending.lock().is_empty()
            && self.running.lock().is_empty()
            && self.in_flight.lock().is_empty()
    }

    /// 等待所有任务结束
    ///
    /// # 返回值
    ///
    /// 在超时前清空返回 `true`
    pub async fn wait_until_drained(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if self.is_drained() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.config.dispatch_interval).await;
        }
    }

    /// 关闭时等待在途任务自然结束，不做强制取消
    pub(crate) async fn drain_in_flight(&self, limit: Duration) {
        let handles: Vec<(String, JoinHandle<()>)> = self.in_flight.lock().drain().collect();
        if handles.is_empty() {
            return;
        }

        info!("Waiting up to {:?} for {} running tasks", limit, handles.len());
        let keys: Vec<String> = handles.iter().map(|(k, _)| k.clone()).collect();
        let joined = futures::future::join_all(handles.into_iter().map(|(_, h)| h));
        match tokio::time::timeout(limit, joined).await {
            Ok(results) => {
                for (key, result) in keys.iter().zip(results) {
                    if let Err(e) = result {
                        error!("Task {} ended abnormally: {}", key, e);
                    }
                }
            }
            Err(_) => warn!(
                "Shutdown proceeding with tasks still running: {}",
                keys.join(", ")
            ),
        }
    }

    // ---------------------------------------------------------------
    // Health, maintenance, persistence
    // ---------------------------------------------------------------

    /// 执行一次健康检查
    pub async fn perform_health_check(&self) {
        let sweep = self.anti_detection.health_check_all_proxies().await;
        let anti = self.anti_detection.metrics_snapshot();
        let uptime_secs = self.uptime().num_seconds().max(0) as f64;
        let pending = self.pending.lock().len();
        let running = self.running.lock().len();
        let utilization = self.resources.lock().usage().utilization_percent;

        let (attempts, success_rate) = {
            let mut metrics = self.metrics.lock();
            let attempts = metrics.total_tasks_executed;
            let success_rate = if attempts == 0 {
                1.0
            } else {
                metrics.successful_tasks as f64 / attempts as f64
            };
            let running_ratio = (uptime_secs / (24.0 * 3600.0)).min(1.0);
            metrics.uptime_percentage = running_ratio * success_rate * 100.0;
            metrics.anti_detection_effectiveness = anti.success_rate * 100.0;
            (attempts, success_rate)
        };

        info!(
            "Health: uptime {:.1}h, success {:.1}%, queue {}, running {}, proxies {}/{} working (checked {}), utilization {:.0}%",
            uptime_secs / 3600.0,
            success_rate * 100.0,
            pending,
            running,
            anti.working_proxies,
            anti.total_proxies,
            sweep.checked,
            utilization
        );

        if attempts > 0 && success_rate < self.config.success_rate_alert {
            warn!("ALERT: low task success rate {:.1}%", success_rate * 100.0);
        }
        if pending > self.config.queue_alert {
            warn!("ALERT: pending queue is large ({} tasks)", pending);
        }
    }

    /// 当前时刻是否处于未执行过的维护窗口
    pub fn maintenance_due(&self) -> bool {
        let Some(offset) = FixedOffset::east_opt(self.config.maintenance_utc_offset_minutes * 60)
        else {
            return false;
        };
        let local = self.clock.now().with_timezone(&offset);
        let window_minutes = (self.config.maintenance_window.as_secs() / 60) as u32;

        local.hour() == self.config.maintenance_hour
            && local.minute() < window_minutes
            && *self.last_maintenance.lock() != Some(local.date_naive())
    }

    /// 维护窗口内执行一次维护，返回是否执行
    pub async fn maybe_run_maintenance(&self) -> bool {
        if !self.maintenance_due() {
            return false;
        }
        self.perform_maintenance().await;
        true
    }

    /// 执行维护：清理历史、重置每日计数、代理体检并保存状态
    pub async fn perform_maintenance(&self) {
        let now = self.clock.now();
        if let Some(offset) = FixedOffset::east_opt(self.config.maintenance_utc_offset_minutes * 60) {
            *self.last_maintenance.lock() = Some(now.with_timezone(&offset).date_naive());
        }

        let was_running = self.state() == SchedulerState::Running;
        if was_running {
            self.set_state(SchedulerState::Maintenance);
        }
        info!("Starting maintenance");

        let cutoff = now - self.config.history_retention;
        let purged = {
            let mut completed = self.completed.lock();
            let before = completed.len();
            completed.retain(|t| t.completed_at.map_or(true, |at| at > cutoff));
            before - completed.len()
        };

        self.tier_manager.lock().reset_daily_counters();
        for tier in self.metrics.lock().tiers_performance.values_mut() {
            tier.tasks_today = 0;
        }

        let sweep = self.anti_detection.health_check_all_proxies().await;

        if let Err(e) = self.persist().await {
            error!("Failed to persist state during maintenance: {}", e);
        }

        info!(
            "Maintenance finished: purged {} old tasks, reset daily counters, {} proxies checked",
            purged, sweep.checked
        );

        if was_running && self.state() == SchedulerState::Maintenance {
            self.set_state(SchedulerState::Running);
        }
    }

    fn persisted_state(&self) -> PersistedState {
        let mut state = self.tier_manager.lock().snapshot();
        let (identity_at, proxy_at) = self.anti_detection.last_rotations();
        state.randomization_state.last_identity_rotation = Some(identity_at);
        state.randomization_state.last_proxy_rotation = Some(proxy_at);
        state
    }

    /// 保存运行状态
    pub async fn persist(&self) -> Result<(), StorageError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let state = self.persisted_state();
        store.save_state(&state).await?;
        debug!("Persisted scheduler state for {} tiers", state.tier_executions.len());
        Ok(())
    }

    /// 从存储恢复状态；文件缺失或损坏时沿用初始状态
    pub async fn restore_state(&self) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match store.load_state().await {
            Ok(Some(state)) => {
                let rotations = (
                    state.randomization_state.last_identity_rotation,
                    state.randomization_state.last_proxy_rotation,
                );
                let tiers = state.tier_executions.len();
                self.tier_manager.lock().restore(state);
                self.anti_detection.restore_rotations(rotations.0, rotations.1);
                info!("Restored scheduler state for {} tiers", tiers);
                true
            }
            Ok(None) => {
                info!("No persisted scheduler state, starting fresh");
                false
            }
            Err(e) => {
                warn!("Ignoring unreadable scheduler state: {}", e);
                false
            }
        }
    }

    /// 写入指标快照
    pub async fn save_metrics(&self) -> Result<(), StorageError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let snapshot = MetricsSnapshot {
            timestamp: self.clock.now(),
            status: self.status(),
        };
        store.save_metrics(&snapshot).await
    }

    /// 调度器状态快照
    pub fn status(&self) -> StatusSnapshot {
        let uptime_hours = self.uptime().num_milliseconds() as f64 / 3_600_000.0;
        let resources = self.resources.lock().usage();
        let pending = self.pending.lock().len();
        let running_tasks: Vec<String> = self.running.lock().keys().cloned().collect();
        let completed = self.completed.lock().len();
        let metrics = self.metrics.lock().clone();
        let tiers = self.tier_manager.lock().status_summary();

        StatusSnapshot {
            state: self.state(),
            uptime_hours,
            resources,
            queues: QueueSizes {
                pending,
                running: running_tasks.len(),
                completed,
            },
            running_tasks,
            metrics,
            anti_detection: self.anti_detection.metrics_snapshot(),
            tiers,
        }
    }

    /// 已完成历史中各状态的任务数
    pub fn completed_by_status(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for task in self.completed.lock().iter() {
            *counts.entry(task.status.to_string()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::catalog::{default_identities, default_tiers};
    use crate::domain::models::state::PersistedState;
    use crate::infrastructure::storage::InMemoryStore;
    use crate::queue::scheduler::{IntelligentScheduler, SchedulerBuilder};
    use crate::utils::clock::ManualClock;
    use chrono::TimeZone;

    fn build(
        config: SchedulerConfig,
        clock: Arc<ManualClock>,
        store: Option<Arc<InMemoryStore>>,
    ) -> IntelligentScheduler {
        let mut builder = SchedulerBuilder::new(default_tiers().unwrap(), default_identities().unwrap())
            .with_config(config)
            .with_clock(clock)
            .with_seed(42);
        if let Some(store) = store {
            builder = builder.with_store(store);
        }
        builder.build().unwrap()
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_maintenance_window_runs_once_per_day() {
        // 04:10 at UTC-3
        let clock = Arc::new(ManualClock::new(utc(2025, 3, 10, 7, 10)));
        let scheduler = build(SchedulerConfig::default(), clock.clone(), None);
        let core = scheduler.core();

        assert!(core.maintenance_due());
        *core.last_maintenance.lock() = Some(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
        assert!(!core.maintenance_due());

        clock.set(utc(2025, 3, 11, 7, 5));
        assert!(core.maintenance_due());

        clock.set(utc(2025, 3, 11, 8, 10));
        assert!(!core.maintenance_due());

        clock.set(utc(2025, 3, 11, 4, 10));
        assert!(!core.maintenance_due());
    }

    #[tokio::test]
    async fn test_maintenance_resets_counters_and_persists() {
        let clock = Arc::new(ManualClock::new(utc(2025, 3, 10, 7, 10)));
        let mut state = PersistedState::default();
        state.tier_executions.insert(
            "critical".to_string(),
            TierExecutionState {
                executions_today: 5,
                ..Default::default()
            },
        );
        let store = Arc::new(InMemoryStore::with_state(state));
        let scheduler = build(SchedulerConfig::default(), clock, Some(store.clone()));
        let core = scheduler.core();

        assert!(core.restore_state().await);
        assert_eq!(core.tier_state("critical").unwrap().executions_today, 5);

        assert!(core.maybe_run_maintenance().await);
        assert!(!core.maybe_run_maintenance().await);

        assert_eq!(core.tier_state("critical").unwrap().executions_today, 0);
        let saved = store.state().await.unwrap();
        assert_eq!(saved.tier_executions["critical"].executions_today, 0);
    }

    #[tokio::test]
    async fn test_history_is_trimmed_and_purged() {
        let clock = Arc::new(ManualClock::new(utc(2025, 3, 10, 12, 0)));
        let config = SchedulerConfig {
            history_cap: 4,
            history_trim_to: 2,
            ..SchedulerConfig::default()
        };
        let scheduler = build(config, clock.clone(), None);
        let core = scheduler.core();

        let queued = core.schedule_tier_now("critical").unwrap();
        assert!(queued >= 5);

        let report = ScrapeReport {
            products_found: 10,
            pages_scraped: 2,
            execution_secs: 1.0,
        };
        let horizon = clock.now() + chrono::Duration::days(1);
        for _ in 0..5 {
            let task = core
                .pending
                .lock()
                .take_next_ready(horizon, |_| true)
                .unwrap();
            let now = clock.now();
            let task = task
                .start(now)
                .unwrap()
                .complete(TaskResult::succeeded(&report, now))
                .unwrap();
            core.finalize(task);
            assert!(core.completed_tasks().len() <= 4);
        }
        assert_eq!(core.completed_tasks().len(), 2);
        assert_eq!(core.completed_by_status()["completed"], 2);

        clock.advance(chrono::Duration::hours(25));
        core.perform_maintenance().await;
        assert!(core.completed_tasks().is_empty());
    }

    #[test]
    fn test_session_break_probability_scales_with_elapsed_time() {
        let clock = Arc::new(ManualClock::new(utc(2025, 3, 10, 12, 0)));
        let never = build(
            SchedulerConfig {
                session_break_probability_per_hour: 0.0,
                ..SchedulerConfig::default()
            },
            clock.clone(),
            None,
        );
        assert!(never.core().maybe_session_break(Duration::from_secs(3600)).is_none());

        let always = build(
            SchedulerConfig {
                session_break_probability_per_hour: 1.0,
                ..SchedulerConfig::default()
            },
            clock,
            None,
        );
        let pause = always
            .core()
            .maybe_session_break(Duration::from_secs(3600))
            .unwrap();
        assert!(pause >= Duration::from_secs(300) && pause <= Duration::from_secs(900));
        assert_eq!(always.core().anti_detection().metrics_snapshot().pattern_breaks, 1);
    }

    #[test]
    fn test_idle_wait_is_clamped() {
        let clock = Arc::new(ManualClock::new(utc(2025, 3, 10, 12, 0)));
        let scheduler = build(SchedulerConfig::default(), clock, None);
        let core = scheduler.core();

        for _ in 0..3 {
            assert!(matches!(
                core.schedule_next_batch().unwrap(),
                SchedulingOutcome::Scheduled { .. }
            ));
        }
        match core.schedule_next_batch().unwrap() {
            SchedulingOutcome::Idle { wait } => {
                assert!(wait >= core.config().idle_sleep_floor);
                assert!(wait <= core.config().idle_sleep_cap);
            }
            other => panic!("expected idle, got {:?}", other),
        }
        assert_eq!(core.status().tiers.tiers.len(), 3);
    }
}
