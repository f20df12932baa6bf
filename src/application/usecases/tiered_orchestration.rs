// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::models::task::{FailureCause, ScrapeFailure, ScrapeReport};
use crate::engines::traits::{ScrapeExecutor, ScrapeRequest};
use crate::queue::scheduler::{IntelligentScheduler, SchedulerBuilder};
use crate::utils::errors::SchedulerError;

/// 一次品类抓取的原始结果
#[derive(Debug, Clone, Default)]
pub struct CategoryScrape {
    /// 抓取到的商品，结构由协作方决定
    pub products: Vec<serde_json::Value>,
    pub pages_scraped: u32,
}

/// 零售商编排器特质
///
/// 外部协作方：具体零售商的抓取、商品入库与套利检测
#[async_trait]
pub trait RetailerOrchestrator: Send + Sync {
    /// 是否有该零售商的抓取器
    fn supports(&self, retailer: &str) -> bool;

    /// 抓取一个品类
    async fn scrape_category(&self, request: &ScrapeRequest) -> Result<CategoryScrape, ScrapeFailure>;

    /// 保存商品，返回实际入库的数量
    async fn persist_products(
        &self,
        request: &ScrapeRequest,
        products: &[serde_json::Value],
    ) -> Result<u32, ScrapeFailure>;

    /// 运行一次套利检测，返回发现的机会数
    async fn detect_arbitrage(&self) -> anyhow::Result<usize>;
}

/// 集成统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntegrationStats {
    pub tier_executions: BTreeMap<String, u64>,
    pub categories_processed: u64,
    pub products_persisted: u64,
    pub errors_handled: u64,
    pub arbitrage_runs: u64,
    pub arbitrage_opportunities: u64,
}

/// 编排执行器选项
#[derive(Debug, Clone)]
pub struct OrchestrationOptions {
    /// 抓取前按反检测包中的品类切换延迟休眠
    pub apply_human_delays: bool,
    /// 每成功处理多少个品类触发一次套利检测，`None` 表示不触发
    pub arbitrage_every: Option<u32>,
}

impl Default for OrchestrationOptions {
    fn default() -> Self {
        Self {
            apply_human_delays: true,
            arbitrage_every: Some(10),
        }
    }
}

/// 把零售商编排器接到调度器上的抓取回调
pub struct OrchestratorExecutor {
    orchestrator: Arc<dyn RetailerOrchestrator>,
    options: OrchestrationOptions,
    stats: Mutex<IntegrationStats>,
    since_arbitrage: AtomicU32,
}

impl OrchestratorExecutor {
    pub fn new(orchestrator: Arc<dyn RetailerOrchestrator>, options: OrchestrationOptions) -> Self {
        Self {
            orchestrator,
            options,
            stats: Mutex::new(IntegrationStats::default()),
            since_arbitrage: AtomicU32::new(0),
        }
    }

    pub fn stats(&self) -> IntegrationStats {
        self.stats.lock().clone()
    }

    fn count_error(&self) {
        self.stats.lock().errors_handled += 1;
    }

    async fn maybe_detect_arbitrage(&self) {
        let Some(every) = self.options.arbitrage_every else {
            return;
        };
        let seen = self.since_arbitrage.fetch_add(1, Ordering::SeqCst) + 1;
        if seen < every.max(1) {
            return;
        }
        self.since_arbitrage.store(0, Ordering::SeqCst);

        match self.orchestrator.detect_arbitrage().await {
            Ok(found) => {
                info!("Arbitrage detection found {} opportunities", found);
                let mut stats = self.stats.lock();
                stats.arbitrage_runs += 1;
                stats.arbitrage_opportunities += found as u64;
            }
            Err(e) => {
                warn!("Arbitrage detection failed: {:#}", e);
                self.count_error();
            }
        }
    }
}

#[async_trait]
impl ScrapeExecutor for OrchestratorExecutor {
    async fn execute(&self, request: &ScrapeRequest) -> Result<ScrapeReport, ScrapeFailure> {
        if !self.orchestrator.supports(&request.retailer) {
            self.count_error();
            return Err(ScrapeFailure::new(
                FailureCause::Rejected,
                format!("no scraper registered for {}", request.retailer),
            ));
        }

        if self.options.apply_human_delays {
            let delay = request.anti_detection.delays.category_switch_secs.max(0.0);
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
        }

        let started = Instant::now();
        let scrape = match self.orchestrator.scrape_category(request).await {
            Ok(scrape) => scrape,
            Err(e) => {
                self.count_error();
                return Err(e);
            }
        };
        let persisted = match self
            .orchestrator
            .persist_products(request, &scrape.products)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                self.count_error();
                return Err(e);
            }
        };

        {
            let mut stats = self.stats.lock();
            *stats.tier_executions.entry(request.tier.clone()).or_insert(0) += 1;
            stats.categories_processed += 1;
            stats.products_persisted += u64::from(persisted);
        }
        info!(
            "{} {}: {} products from {} pages",
            request.retailer, request.category, persisted, scrape.pages_scraped
        );

        self.maybe_detect_arbitrage().await;

        Ok(ScrapeReport {
            products_found: persisted,
            pages_scraped: scrape.pages_scraped,
            execution_secs: started.elapsed().as_secs_f64(),
        })
    }

    fn name(&self) -> &'static str {
        "orchestrator"
    }
}

/// 运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// 持续运行，直到收到停止信号或达到最长运行时间
    Continuous { max_runtime: Option<Duration> },
    /// 每个层级调度一次，等待队列清空（有上限）后停止
    SingleCycle { timeout: Duration },
}

/// 分层编排
pub struct TieredOrchestration {
    scheduler: IntelligentScheduler,
    executor: Arc<OrchestratorExecutor>,
}

impl TieredOrchestration {
    /// 创建分层编排
    ///
    /// # 参数
    ///
    /// * `builder` - 调度器构建器，其执行器会被替换为编排执行器
    /// * `orchestrator` - 零售商编排器
    /// * `options` - 编排选项
    pub fn new(
        builder: SchedulerBuilder,
        orchestrator: Arc<dyn RetailerOrchestrator>,
        options: OrchestrationOptions,
    ) -> Result<Self, SchedulerError> {
        let executor = Arc::new(OrchestratorExecutor::new(orchestrator, options));
        let scheduler = builder.with_executor(executor.clone()).build()?;
        Ok(Self {
            scheduler,
            executor,
        })
    }

    pub fn scheduler(&self) -> &IntelligentScheduler {
        &self.scheduler
    }

    pub fn stats(&self) -> IntegrationStats {
        self.executor.stats()
    }

    /// 按模式运行
    pub async fn run(&self, mode: RunMode) -> Result<IntegrationStats, SchedulerError> {
        match mode {
            RunMode::Continuous { max_runtime } => {
                info!("Starting continuous tiered orchestration");
                self.scheduler
                    .run_until(async move {
                        match max_runtime {
                            Some(limit) => tokio::select! {
                                _ = shutdown_signal() => {}
                                _ = tokio::time::sleep(limit) => {
                                    info!("Maximum runtime of {:?} reached", limit);
                                }
                            },
                            None => shutdown_signal().await,
                        }
                    })
                    .await?;
            }
            RunMode::SingleCycle { timeout } => {
                info!("Starting single tiered cycle");
                self.scheduler.restore_state().await;

                let tiers: Vec<String> = self
                    .scheduler
                    .status()
                    .tiers
                    .tiers
                    .keys()
                    .cloned()
                    .collect();
                let mut queued = 0;
                for tier in &tiers {
                    queued += self.scheduler.schedule_tier_now(tier)?;
                }

                self.scheduler.start().await?;
                if !self.scheduler.wait_until_drained(timeout).await {
                    warn!("Single cycle did not finish within {:?}", timeout);
                }
                self.scheduler.stop().await?;
                info!("Single cycle finished: {} tasks across {} tiers", queued, tiers.len());
            }
        }

        let stats = self.stats();
        info!(
            "Integration stats: {} categories, {} products, {} errors, {} arbitrage runs",
            stats.categories_processed,
            stats.products_persisted,
            stats.errors_handled,
            stats.arbitrage_runs
        );
        Ok(stats)
    }
}

/// 等待 Ctrl-C 或 SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Unable to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Unable to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received"),
        _ = terminate => info!("SIGTERM received"),
    }
}
