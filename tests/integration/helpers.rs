// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pricetier::config::catalog::default_identities;
use pricetier::domain::models::profile::ProxyEndpoint;
use pricetier::domain::models::task::{FailureCause, ScrapeFailure, ScrapeReport};
use pricetier::domain::models::tier::{Target, Tier, TierSpec};
use pricetier::domain::services::tier_manager::SchedulingTunables;
use pricetier::engines::traits::{EngineError, ProxyProber, ScrapeExecutor, ScrapeRequest};
use pricetier::queue::scheduler::{IntelligentScheduler, SchedulerBuilder, SchedulerConfig};
use pricetier::utils::retry_policy::RetryPolicy;

/// 每个目标一个零售商
pub fn tier(name: &str, retailers: &[&str], max_concurrent: usize) -> Tier {
    build_tier(name, retailers, max_concurrent, false)
}

/// 启用代理轮换的层级
pub fn proxied_tier(name: &str, retailers: &[&str], max_concurrent: usize) -> Tier {
    build_tier(name, retailers, max_concurrent, true)
}

fn build_tier(name: &str, retailers: &[&str], max_concurrent: usize, proxy_rotation: bool) -> Tier {
    let targets = retailers
        .iter()
        .enumerate()
        .map(|(i, retailer)| {
            Target::try_new(
                *retailer,
                format!("cat{}", i),
                format!("https://{}.example.cl/cat{}", retailer, i),
                0.5,
            )
            .unwrap()
        })
        .collect();

    Tier::try_from(TierSpec {
        name: name.to_string(),
        frequency: Duration::from_secs(3600),
        pages_range: (1, 2),
        priority: 0.9,
        jitter: 0.1,
        max_concurrent,
        proxy_rotation,
        stealth_mode: true,
        targets,
    })
    .unwrap()
}

/// 毫秒级间隔与退避，后台周期任务基本不触发
pub fn fast_config(max_global: usize, max_per_target: usize, max_retries: u32) -> SchedulerConfig {
    SchedulerConfig {
        max_concurrent_global: max_global,
        max_concurrent_per_target: max_per_target,
        retry: RetryPolicy {
            max_retries,
            ..RetryPolicy::fast()
        },
        dispatch_interval: Duration::from_millis(5),
        idle_sleep_floor: Duration::from_millis(20),
        idle_sleep_cap: Duration::from_millis(50),
        health_check_interval: Duration::from_secs(3600),
        metrics_interval: Duration::from_secs(3600),
        maintenance_poll: Duration::from_secs(3600),
        session_break_probability_per_hour: 0.0,
        task_timeout: Some(Duration::from_secs(5)),
        worker_shutdown_timeout: Duration::from_secs(2),
        drain_timeout: Duration::from_secs(2),
        ..SchedulerConfig::default()
    }
}

pub fn fast_tunables() -> SchedulingTunables {
    SchedulingTunables {
        schedule_gap: (Duration::from_millis(1), Duration::from_millis(2)),
        ..SchedulingTunables::default()
    }
}

pub fn builder(tiers: Vec<Tier>, config: SchedulerConfig) -> SchedulerBuilder {
    SchedulerBuilder::new(tiers, default_identities().unwrap())
        .with_config(config)
        .with_tunables(fast_tunables())
        .with_prober(Arc::new(NoProbe))
        .with_seed(7)
}

pub fn scheduler(
    tiers: Vec<Tier>,
    config: SchedulerConfig,
    executor: Arc<dyn ScrapeExecutor>,
) -> IntelligentScheduler {
    builder(tiers, config).with_executor(executor).build().unwrap()
}

/// 探测总是成功
pub struct NoProbe;

#[async_trait]
impl ProxyProber for NoProbe {
    async fn probe(&self, _proxy: &ProxyEndpoint, _timeout: Duration) -> Result<Duration, EngineError> {
        Ok(Duration::from_millis(10))
    }

    fn name(&self) -> &'static str {
        "no_probe"
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Succeed,
    Fail(FailureCause),
    Panic,
}

/// 可编排结果的抓取回调，记录调用次数和并发峰值
pub struct ScriptedExecutor {
    behavior: Behavior,
    delay: Duration,
    calls: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    per_retailer: Mutex<HashMap<String, usize>>,
    max_per_retailer: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(behavior: Behavior, delay: Duration) -> Self {
        Self {
            behavior,
            delay,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            per_retailer: Mutex::new(HashMap::new()),
            max_per_retailer: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn max_per_retailer(&self) -> usize {
        self.max_per_retailer.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScrapeExecutor for ScriptedExecutor {
    async fn execute(&self, request: &ScrapeRequest) -> Result<ScrapeReport, ScrapeFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        {
            let mut per_retailer = self.per_retailer.lock();
            let load = per_retailer.entry(request.retailer.clone()).or_insert(0);
            *load += 1;
            self.max_per_retailer.fetch_max(*load, Ordering::SeqCst);
        }

        tokio::time::sleep(self.delay).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        if let Some(load) = self.per_retailer.lock().get_mut(&request.retailer) {
            *load -= 1;
        }

        match self.behavior {
            Behavior::Succeed => Ok(ScrapeReport {
                products_found: 12,
                pages_scraped: request.pages_to_scrape,
                execution_secs: self.delay.as_secs_f64(),
            }),
            Behavior::Fail(cause) => Err(ScrapeFailure::new(cause, "scripted failure")),
            Behavior::Panic => panic!("scripted panic"),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
