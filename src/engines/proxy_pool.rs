// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::models::profile::{ProxyEndpoint, ProxyHealth};
use crate::engines::health_monitor::{HealthCheckConfig, ProbeOutcome, ProxyHealthMonitor};
use crate::utils::clock::Clock;

/// 代理选择打分参数
#[derive(Debug, Clone)]
pub struct ProxySelection {
    /// 成功率在打分中的权重，其余权重给空闲度
    pub success_weight: f64,
    /// 空闲多久视为完全空闲
    pub idle_horizon: Duration,
}

impl Default for ProxySelection {
    fn default() -> Self {
        Self {
            success_weight: 0.7,
            idle_horizon: Duration::from_secs(3600),
        }
    }
}

/// 代理池中的一项
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyEntry {
    pub endpoint: ProxyEndpoint,
    pub health: ProxyHealth,
}

/// 一次健康巡检的汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthSweepSummary {
    pub checked: usize,
    pub healthy: usize,
    pub failed: usize,
    /// 本次巡检中新被禁用的代理
    pub newly_disabled: Vec<String>,
}

/// 代理池
///
/// 代理在启动时加载，运行期间只会被标记为不可用，不会被删除。
pub struct ProxyPool {
    entries: Mutex<Vec<ProxyEntry>>,
    monitor: ProxyHealthMonitor,
    selection: ProxySelection,
    clock: Arc<dyn Clock>,
    sweep_lock: tokio::sync::Mutex<()>,
}

impl ProxyPool {
    pub fn new(
        proxies: Vec<ProxyEndpoint>,
        monitor: ProxyHealthMonitor,
        selection: ProxySelection,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let entries = proxies
            .into_iter()
            .map(|endpoint| ProxyEntry {
                endpoint,
                health: ProxyHealth::default(),
            })
            .collect();

        Self {
            entries: Mutex::new(entries),
            monitor,
            selection,
            clock,
            sweep_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn working_count(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| self.is_eligible(&e.health))
            .count()
    }

    pub fn snapshot(&self) -> Vec<ProxyEntry> {
        self.entries.lock().clone()
    }

    fn is_eligible(&self, health: &ProxyHealth) -> bool {
        health.is_working
            && health.consecutive_failures < self.monitor.config().max_consecutive_failures
    }

    /// 选择一个代理
    ///
    /// 没有可用代理时先做一次健康巡检再重新筛选。
    pub async fn pick(&self) -> Option<ProxyEndpoint> {
        self.pick_avoiding(None).await
    }

    /// 选择一个代理，尽量避开 `avoid`
    ///
    /// `avoid` 是唯一可用的代理时仍会返回它。
    pub async fn pick_avoiding(&self, avoid: Option<&str>) -> Option<ProxyEndpoint> {
        if self.is_empty() {
            return None;
        }
        if let Some(proxy) = self.select_best(avoid) {
            return Some(proxy);
        }

        info!("No eligible proxies, running health sweep before retrying selection");
        self.health_check_all().await;
        self.select_best(avoid)
    }

    fn select_best(&self, avoid: Option<&str>) -> Option<ProxyEndpoint> {
        if let Some(avoid) = avoid {
            if let Some(proxy) = self.select_scored(|id| id != avoid) {
                return Some(proxy);
            }
        }
        self.select_scored(|_| true)
    }

    fn select_scored(&self, allowed: impl Fn(&str) -> bool) -> Option<ProxyEndpoint> {
        let now = self.clock.now();
        let horizon = self.selection.idle_horizon.as_secs_f64().max(1.0);
        let success_weight = self.selection.success_weight;

        let mut entries = self.entries.lock();
        let best = entries
            .iter_mut()
            .filter(|e| {
                e.health.is_working
                    && e.health.consecutive_failures
                        < self.monitor.config().max_consecutive_failures
                    && allowed(e.endpoint.id().as_str())
            })
            .map(|e| {
                let idleness = e
                    .health
                    .last_used
                    .map(|t| ((now - t).num_milliseconds().max(0) as f64 / 1000.0 / horizon).min(1.0))
                    .unwrap_or(1.0);
                let score = e.health.success_rate * success_weight + idleness * (1.0 - success_weight);
                (score, e)
            })
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, e)| e)?;

        best.health.last_used = Some(now);
        Some(best.endpoint.clone())
    }

    /// 如果代理仍可用，刷新其使用时间并返回
    pub fn touch_if_eligible(&self, proxy_id: &str) -> Option<ProxyEndpoint> {
        let now = self.clock.now();
        let max_failures = self.monitor.config().max_consecutive_failures;
        let mut entries = self.entries.lock();
        let entry = entries.iter_mut().find(|e| e.endpoint.id() == proxy_id)?;
        if !entry.health.is_working || entry.health.consecutive_failures >= max_failures {
            return None;
        }
        entry.health.last_used = Some(now);
        Some(entry.endpoint.clone())
    }

    /// 对所有代理做一次健康巡检
    pub async fn health_check_all(&self) -> HealthSweepSummary {
        let _guard = self.sweep_lock.lock().await;

        let endpoints: Vec<ProxyEndpoint> =
            self.entries.lock().iter().map(|e| e.endpoint.clone()).collect();
        if endpoints.is_empty() {
            return HealthSweepSummary::default();
        }

        let outcomes = self.monitor.probe_all(endpoints).await;
        let summary = self.apply_outcomes(outcomes);

        gauge!("proxy_pool_working").set(self.working_count() as f64);
        info!(
            "Proxy health sweep: {} checked, {} healthy, {} failed",
            summary.checked, summary.healthy, summary.failed
        );
        summary
    }

    fn apply_outcomes(&self, outcomes: Vec<(String, ProbeOutcome)>) -> HealthSweepSummary {
        let config = self.monitor.config().clone();
        let mut summary = HealthSweepSummary::default();
        let mut entries = self.entries.lock();

        for (proxy_id, outcome) in outcomes {
            let Some(entry) = entries.iter_mut().find(|e| e.endpoint.id() == proxy_id) else {
                continue;
            };
            summary.checked += 1;
            let health = &mut entry.health;

            match outcome {
                ProbeOutcome::Healthy { response_time } => {
                    summary.healthy += 1;
                    counter!("proxy_health_checks_total", "outcome" => "healthy").increment(1);
                    health.response_time_ms = Some(response_time.as_secs_f64() * 1000.0);
                    health.consecutive_failures = 0;
                    health.is_working = true;
                    health.success_rate = (health.success_rate * (1.0 - config.success_smoothing)
                        + config.success_smoothing)
                        .min(1.0);
                }
                ProbeOutcome::Failed { error } => {
                    summary.failed += 1;
                    counter!("proxy_health_checks_total", "outcome" => "failed").increment(1);
                    if Self::count_failure(&config, health, &proxy_id, &error) {
                        summary.newly_disabled.push(proxy_id.clone());
                    }
                }
            }
        }

        summary
    }

    /// 记录一次经由该代理的抓取失败
    ///
    /// 与健康检查失败计入同一个连续失败计数，达到阈值后禁用。
    ///
    /// # 返回值
    ///
    /// 代理因此次失败被禁用时返回 `true`
    pub fn record_failure(&self, proxy_id: &str, reason: &str) -> bool {
        let config = self.monitor.config().clone();
        let disabled = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.iter_mut().find(|e| e.endpoint.id() == proxy_id) else {
                return false;
            };
            Self::count_failure(&config, &mut entry.health, proxy_id, reason)
        };
        if disabled {
            gauge!("proxy_pool_working").set(self.working_count() as f64);
        }
        disabled
    }

    fn count_failure(
        config: &HealthCheckConfig,
        health: &mut ProxyHealth,
        proxy_id: &str,
        reason: &str,
    ) -> bool {
        health.consecutive_failures += 1;
        health.success_rate = (health.success_rate * config.failure_decay).max(0.0);
        if health.consecutive_failures >= config.max_consecutive_failures && health.is_working {
            health.is_working = false;
            warn!(
                "ALARM: Proxy {} disabled after {} consecutive failures: {}",
                proxy_id, health.consecutive_failures, reason
            );
            true
        } else {
            warn!(
                "Proxy {} failed ({} consecutive): {}",
                proxy_id, health.consecutive_failures, reason
            );
            false
        }
    }
}
