// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::domain::models::profile::ProxyEndpoint;
use crate::domain::models::task::{AntiDetectionBundle, ExecutionTask, ScrapeFailure, ScrapeReport};

/// 引擎错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    /// 请求失败
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    /// 超时
    #[error("Timeout")]
    Timeout,
    /// 代理配置无效
    #[error("Invalid proxy: {0}")]
    InvalidProxy(String),
    /// 探测目标返回了非成功状态码
    #[error("Unexpected status code: {0}")]
    UnexpectedStatus(u16),
    /// 其他错误
    #[error("Other error: {0}")]
    Other(String),
}

/// 抓取请求
///
/// 交给抓取回调的只读任务视图
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeRequest {
    pub task_id: String,
    pub retailer: String,
    pub category: String,
    pub url: String,
    pub tier: String,
    pub pages_to_scrape: u32,
    /// 第几次执行，从 1 开始
    pub attempt: u32,
    pub anti_detection: AntiDetectionBundle,
}

impl From<&ExecutionTask> for ScrapeRequest {
    fn from(task: &ExecutionTask) -> Self {
        Self {
            task_id: task.id.clone(),
            retailer: task.retailer.clone(),
            category: task.category.clone(),
            url: task.url.clone(),
            tier: task.tier.clone(),
            pages_to_scrape: task.pages_to_scrape,
            attempt: task.attempts,
            anti_detection: task.anti_detection.clone(),
        }
    }
}

/// 抓取回调特质
///
/// 调度核心与具体零售商抓取、入库、套利检测之间的接缝
#[async_trait]
pub trait ScrapeExecutor: Send + Sync {
    /// 执行一次抓取
    ///
    /// # 参数
    ///
    /// * `request` - 任务视图
    ///
    /// # 返回值
    ///
    /// * `Ok(ScrapeReport)` - 抓取成功
    /// * `Err(ScrapeFailure)` - 抓取失败及其原因
    async fn execute(&self, request: &ScrapeRequest) -> Result<ScrapeReport, ScrapeFailure>;

    /// 获取执行器名称
    fn name(&self) -> &'static str;
}

/// 代理探测特质
#[async_trait]
pub trait ProxyProber: Send + Sync {
    /// 通过代理完成一次轻量往返，返回耗时
    async fn probe(&self, proxy: &ProxyEndpoint, timeout: Duration) -> Result<Duration, EngineError>;

    fn name(&self) -> &'static str;
}
