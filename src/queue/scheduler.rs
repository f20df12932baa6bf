// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::settings::Settings;
use crate::domain::models::metrics::{SchedulerState, StatusSnapshot};
use crate::domain::models::profile::{IdentityProfile, ProxyEndpoint};
use crate::domain::models::task::ExecutionTask;
use crate::domain::models::tier::{Tier, TierExecutionState};
use crate::domain::repositories::state_repository::StateRepository;
use crate::domain::services::tier_manager::{SchedulingTunables, TierManager};
use crate::engines::anti_detection::{AntiDetectionConfig, AntiDetectionSystem};
use crate::engines::reqwest_prober::ReqwestProber;
use crate::engines::simulated::SimulatedExecutor;
use crate::engines::traits::{ProxyProber, ScrapeExecutor};
use crate::infrastructure::storage::JsonFileStore;
use crate::queue::core::{SchedulerCore, SchedulingOutcome};
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::errors::SchedulerError;
use crate::utils::random::SharedRng;
use crate::utils::retry_policy::RetryPolicy;
use crate::workers::dispatch_worker::DispatchWorker;
use crate::workers::health_worker::HealthWorker;
use crate::workers::maintenance_worker::MaintenanceWorker;
use crate::workers::manager::WorkerManager;
use crate::workers::metrics_worker::MetricsWorker;
use crate::workers::scheduling_worker::SchedulingWorker;

/// 调度器运行参数
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// 全局并发上限
    pub max_concurrent_global: usize,
    /// 单个零售商并发上限
    pub max_concurrent_per_target: usize,
    pub retry: RetryPolicy,
    /// 派发循环轮询间隔
    pub dispatch_interval: Duration,
    /// 空闲等待上限
    pub idle_sleep_cap: Duration,
    /// 空闲等待下限
    pub idle_sleep_floor: Duration,
    pub health_check_interval: Duration,
    pub metrics_interval: Duration,
    /// 维护窗口起始小时（维护时区）
    pub maintenance_hour: u32,
    pub maintenance_window: Duration,
    /// 维护窗口检查间隔
    pub maintenance_poll: Duration,
    pub maintenance_utc_offset_minutes: i32,
    pub session_break_probability_per_hour: f64,
    /// 单次抓取回调超时，`None` 表示不限制
    pub task_timeout: Option<Duration>,
    pub history_cap: usize,
    pub history_trim_to: usize,
    pub history_retention: chrono::Duration,
    pub worker_shutdown_timeout: Duration,
    pub drain_timeout: Duration,
    pub success_rate_alert: f64,
    pub queue_alert: usize,
    /// 构造翻页顺序时假定的品类总页数
    pub assumed_total_pages: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_global: 3,
            max_concurrent_per_target: 1,
            retry: RetryPolicy::default(),
            dispatch_interval: Duration::from_secs(1),
            idle_sleep_cap: Duration::from_secs(300),
            idle_sleep_floor: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(15 * 60),
            metrics_interval: Duration::from_secs(10 * 60),
            maintenance_hour: 4,
            maintenance_window: Duration::from_secs(30 * 60),
            maintenance_poll: Duration::from_secs(5 * 60),
            maintenance_utc_offset_minutes: -180,
            session_break_probability_per_hour: 0.05,
            task_timeout: Some(Duration::from_secs(30 * 60)),
            history_cap: 200,
            history_trim_to: 150,
            history_retention: chrono::Duration::hours(24),
            worker_shutdown_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(300),
            success_rate_alert: 0.8,
            queue_alert: 50,
            assumed_total_pages: 10,
        }
    }
}

/// 调度器构建器
pub struct SchedulerBuilder {
    tiers: Vec<Tier>,
    identities: Vec<IdentityProfile>,
    proxies: Vec<ProxyEndpoint>,
    config: SchedulerConfig,
    tunables: SchedulingTunables,
    anti_detection: AntiDetectionConfig,
    executor: Option<Arc<dyn ScrapeExecutor>>,
    prober: Option<Arc<dyn ProxyProber>>,
    store: Option<Arc<dyn StateRepository>>,
    clock: Option<Arc<dyn Clock>>,
    rng: Option<SharedRng>,
}

impl SchedulerBuilder {
    pub fn new(tiers: Vec<Tier>, identities: Vec<IdentityProfile>) -> Self {
        Self {
            tiers,
            identities,
            proxies: Vec::new(),
            config: SchedulerConfig::default(),
            tunables: SchedulingTunables::default(),
            anti_detection: AntiDetectionConfig::default(),
            executor: None,
            prober: None,
            store: None,
            clock: None,
            rng: None,
        }
    }

    /// 由配置文件组装：JSON 文件存储、reqwest 代理探测
    pub fn from_settings(settings: &Settings) -> Result<Self, SchedulerError> {
        let mut builder = Self::new(settings.tiers()?, settings.identities()?)
            .with_config(settings.scheduler_config()?)
            .with_tunables(settings.tunables()?)
            .with_anti_detection(settings.anti_detection_config()?)
            .with_proxies(settings.proxies()?)
            .with_prober(Arc::new(ReqwestProber::new(
                settings.anti_detection.probe_url.clone(),
            )))
            .with_store(Arc::new(JsonFileStore::new(
                settings.storage.state_path.clone(),
                settings.storage.metrics_path.clone(),
            )));
        if let Some(seed) = settings.scheduler.seed {
            builder = builder.with_seed(seed);
        }
        Ok(builder)
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_tunables(mut self, tunables: SchedulingTunables) -> Self {
        self.tunables = tunables;
        self
    }

    pub fn with_anti_detection(mut self, config: AntiDetectionConfig) -> Self {
        self.anti_detection = config;
        self
    }

    pub fn with_proxies(mut self, proxies: Vec<ProxyEndpoint>) -> Self {
        self.proxies = proxies;
        self
    }

    /// 注册抓取回调，未注册时使用模拟执行器
    pub fn with_executor(mut self, executor: Arc<dyn ScrapeExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_prober(mut self, prober: Arc<dyn ProxyProber>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn StateRepository>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_rng(mut self, rng: SharedRng) -> Self {
        self.rng = Some(rng);
        self
    }

    pub fn with_seed(self, seed: u64) -> Self {
        self.with_rng(SharedRng::seeded(seed))
    }

    /// 构建调度器
    ///
    /// # 返回值
    ///
    /// * `Ok(IntelligentScheduler)` - 构建成功，尚未启动
    /// * `Err(SchedulerError)` - 层级、身份或常量非法
    pub fn build(self) -> Result<IntelligentScheduler, SchedulerError> {
        let rng = self.rng.unwrap_or_default();
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let prober = self
            .prober
            .unwrap_or_else(|| Arc::new(ReqwestProber::default()) as Arc<dyn ProxyProber>);
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(SimulatedExecutor::new(rng.clone())) as Arc<dyn ScrapeExecutor>);

        let tier_manager = TierManager::new(self.tiers, self.tunables, rng.clone(), clock.clone())?;
        let anti_detection = AntiDetectionSystem::new(
            self.anti_detection,
            self.identities,
            self.proxies,
            prober,
            rng.clone(),
            clock.clone(),
        )?;

        info!(
            "Scheduler built: executor {}, {} concurrent ({} per retailer), {} retries",
            executor.name(),
            self.config.max_concurrent_global,
            self.config.max_concurrent_per_target,
            self.config.retry.max_retries
        );

        let core = SchedulerCore::new(
            self.config,
            tier_manager,
            Arc::new(anti_detection),
            executor,
            self.store,
            rng,
            clock,
        );

        Ok(IntelligentScheduler {
            core: Arc::new(core),
            workers: tokio::sync::Mutex::new(None),
            restored: std::sync::atomic::AtomicBool::new(false),
        })
    }
}

/// 智能调度器
///
/// 启动后运行五个后台循环：层级调度、任务派发、健康检查、维护和指标写入。
pub struct IntelligentScheduler {
    core: Arc<SchedulerCore>,
    workers: tokio::sync::Mutex<Option<WorkerManager>>,
    restored: std::sync::atomic::AtomicBool,
}

impl IntelligentScheduler {
    pub fn builder(tiers: Vec<Tier>, identities: Vec<IdentityProfile>) -> SchedulerBuilder {
        SchedulerBuilder::new(tiers, identities)
    }

    pub fn core(&self) -> &Arc<SchedulerCore> {
        &self.core
    }

    /// 启动后台循环，重复调用不会产生第二组循环
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut workers = self.workers.lock().await;
        if workers.is_some() {
            warn!("Scheduler already running");
            return Ok(());
        }

        if !self.restored.swap(true, std::sync::atomic::Ordering::SeqCst) {
            self.core.restore_state().await;
        }
        self.core.mark_started();

        let mut manager = WorkerManager::new(self.core.clone());
        manager.spawn(Arc::new(SchedulingWorker::new(self.core.clone())), true);
        manager.spawn(Arc::new(DispatchWorker::new(self.core.clone())), true);
        manager.spawn(Arc::new(HealthWorker::new(self.core.clone())), false);
        manager.spawn(Arc::new(MaintenanceWorker::new(self.core.clone())), false);
        manager.spawn(Arc::new(MetricsWorker::new(self.core.clone())), false);
        *workers = Some(manager);

        info!("Intelligent scheduler started");
        Ok(())
    }

    /// 停止调度器
    ///
    /// 停止后台循环，等待运行中的任务结束（有上限），然后保存状态和指标。
    /// 可以重复调用。
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let Some(manager) = self.workers.lock().await.take() else {
            return Ok(());
        };

        info!("Stopping intelligent scheduler");
        let failed = self.core.state() == SchedulerState::Error;
        if !failed {
            self.core.set_state(SchedulerState::Paused);
        }

        manager.shutdown(self.core.config().worker_shutdown_timeout).await;
        self.core
            .drain_in_flight(self.core.config().drain_timeout)
            .await;

        if let Err(e) = self.core.persist().await {
            error!("Failed to persist scheduler state: {}", e);
        }
        if let Err(e) = self.core.save_metrics().await {
            error!("Failed to save metrics snapshot: {}", e);
        }

        info!("Intelligent scheduler stopped");
        Ok(())
    }

    /// 启动并运行，直到 `shutdown` 完成或某个关键循环失败，然后停止
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), SchedulerError>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        let fatal = match self.workers.lock().await.as_ref() {
            Some(manager) => manager.fatal_token(),
            None => return Ok(()),
        };

        tokio::select! {
            _ = shutdown => info!("Shutdown requested"),
            _ = fatal.cancelled() => error!("A critical scheduler loop failed, shutting down"),
        }

        self.stop().await
    }

    pub fn state(&self) -> SchedulerState {
        self.core.state()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.core.status()
    }

    /// 立即为指定层级生成一批任务
    pub fn schedule_tier_now(&self, tier: &str) -> Result<usize, SchedulerError> {
        self.core.schedule_tier_now(tier)
    }

    /// 手动执行一次层级调度
    pub fn schedule_next_batch(&self) -> Result<SchedulingOutcome, SchedulerError> {
        self.core.schedule_next_batch()
    }

    pub fn tier_state(&self, tier: &str) -> Option<TierExecutionState> {
        self.core.tier_state(tier)
    }

    pub fn completed_tasks(&self) -> Vec<ExecutionTask> {
        self.core.completed_tasks()
    }

    /// 从存储恢复状态
    pub async fn restore_state(&self) -> bool {
        self.restored.store(true, std::sync::atomic::Ordering::SeqCst);
        self.core.restore_state().await
    }

    /// 保存运行状态
    pub async fn persist_state(&self) -> Result<(), SchedulerError> {
        self.core.persist().await?;
        Ok(())
    }

    pub async fn wait_until_drained(&self, limit: Duration) -> bool {
        self.core.wait_until_drained(limit).await
    }

    pub async fn is_running(&self) -> bool {
        self.workers.lock().await.is_some()
    }
}
