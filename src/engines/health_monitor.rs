// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::domain::models::profile::ProxyEndpoint;
use crate::engines::traits::{EngineError, ProxyProber};

/// 健康检查配置
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// 单次探测超时时间
    pub timeout: Duration,
    /// 最大连续失败次数，达到后代理被标记为不可用
    pub max_consecutive_failures: u32,
    /// 同时进行的探测数量上限
    pub max_parallel_checks: usize,
    /// 探测成功时成功率向 1 靠拢的权重
    pub success_smoothing: f64,
    /// 探测失败时成功率的乘性衰减
    pub failure_decay: f64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_consecutive_failures: 3,
            max_parallel_checks: 5,
            success_smoothing: 0.1,
            failure_decay: 0.8,
        }
    }
}

/// 单个代理的探测结果
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Healthy { response_time: Duration },
    Failed { error: String },
}

/// 代理健康监控器
///
/// 只负责并发探测，探测结果由代理池落到各自的健康状态上。
pub struct ProxyHealthMonitor {
    prober: Arc<dyn ProxyProber>,
    config: HealthCheckConfig,
}

impl ProxyHealthMonitor {
    pub fn new(prober: Arc<dyn ProxyProber>, config: HealthCheckConfig) -> Self {
        Self { prober, config }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// 并发探测一组代理
    ///
    /// # 参数
    ///
    /// * `proxies` - 待探测的代理
    ///
    /// # 返回值
    ///
    /// 返回 `(代理标识, 探测结果)` 列表，顺序与输入无关
    pub async fn probe_all(&self, proxies: Vec<ProxyEndpoint>) -> Vec<(String, ProbeOutcome)> {
        let parallelism = self.config.max_parallel_checks.max(1);

        stream::iter(proxies)
            .map(|proxy| async move {
                let outcome = self.probe_one(&proxy).await;
                (proxy.id(), outcome)
            })
            .buffer_unordered(parallelism)
            .collect()
            .await
    }

    async fn probe_one(&self, proxy: &ProxyEndpoint) -> ProbeOutcome {
        let timeout = self.config.timeout;
        // The prober gets the same budget, the outer timeout guards probers that ignore it
        let result = match tokio::time::timeout(timeout, self.prober.probe(proxy, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout),
        };

        match result {
            Ok(response_time) => {
                debug!("Proxy {} healthy in {:?}", proxy, response_time);
                ProbeOutcome::Healthy { response_time }
            }
            Err(e) => {
                debug!("Proxy {} probe via {} failed: {}", proxy, self.prober.name(), e);
                ProbeOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}
