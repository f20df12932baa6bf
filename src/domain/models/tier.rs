// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use super::DomainError;

/// 抓取目标，一个 (零售商, 品类) 组合
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub retailer: String,
    pub category: String,
    pub url: String,
    /// 品类自身的权重
    pub priority: f64,
}

impl Target {
    /// 创建并校验抓取目标
    ///
    /// # 参数
    ///
    /// * `retailer` - 零售商标识
    /// * `category` - 品类标识
    /// * `url` - 品类页面地址，必须是 http(s) 绝对地址
    /// * `priority` - 品类权重，必须为正
    ///
    /// # 返回值
    ///
    /// * `Ok(Target)` - 校验通过
    /// * `Err(DomainError)` - 任一字段非法
    pub fn try_new(
        retailer: impl Into<String>,
        category: impl Into<String>,
        url: impl Into<String>,
        priority: f64,
    ) -> Result<Self, DomainError> {
        let retailer = retailer.into();
        let category = category.into();
        let url = url.into();

        if retailer.trim().is_empty() || category.trim().is_empty() {
            return Err(DomainError::ValidationError(
                "target retailer and category must not be empty".to_string(),
            ));
        }
        let parsed = Url::parse(&url).map_err(|e| {
            DomainError::ValidationError(format!("target url '{}' is invalid: {}", url, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DomainError::ValidationError(format!(
                "target url '{}' must use http or https",
                url
            )));
        }
        if !(priority.is_finite() && priority > 0.0) {
            return Err(DomainError::ValidationError(format!(
                "target {}/{} priority must be > 0",
                retailer, category
            )));
        }

        Ok(Self {
            retailer,
            category,
            url,
            priority,
        })
    }
}

/// 构造层级所需的原始参数
#[derive(Debug, Clone)]
pub struct TierSpec {
    pub name: String,
    pub frequency: Duration,
    pub pages_range: (u32, u32),
    pub priority: f64,
    /// 抖动比例，0 到 1 之间
    pub jitter: f64,
    pub max_concurrent: usize,
    pub proxy_rotation: bool,
    pub stealth_mode: bool,
    pub targets: Vec<Target>,
}

/// 层级
///
/// 命名的调度策略：运行频率、页数范围、优先级权重、抖动比例、
/// 并发上限以及是否启用代理轮换和隐身模式。
/// 只能通过 [`TryFrom<TierSpec>`] 构造，进程生命周期内不可变。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tier {
    name: String,
    frequency: Duration,
    pages_range: (u32, u32),
    priority: f64,
    jitter: f64,
    max_concurrent: usize,
    proxy_rotation: bool,
    stealth_mode: bool,
    targets: Vec<Target>,
}

impl TryFrom<TierSpec> for Tier {
    type Error = DomainError;

    fn try_from(spec: TierSpec) -> Result<Self, Self::Error> {
        let invalid = |msg: String| DomainError::ValidationError(format!("tier '{}': {}", spec.name, msg));

        if spec.name.trim().is_empty() {
            return Err(DomainError::ValidationError(
                "tier name must not be empty".to_string(),
            ));
        }
        if spec.frequency.is_zero() {
            return Err(invalid("frequency must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&spec.jitter) {
            return Err(invalid(format!("jitter {} must be within [0, 1]", spec.jitter)));
        }
        if !(spec.priority.is_finite() && spec.priority > 0.0) {
            return Err(invalid("priority must be > 0".to_string()));
        }
        let (min_pages, max_pages) = spec.pages_range;
        if min_pages == 0 || min_pages > max_pages {
            return Err(invalid(format!(
                "pages range ({}, {}) must satisfy 1 <= min <= max",
                min_pages, max_pages
            )));
        }
        if spec.max_concurrent == 0 {
            return Err(invalid("max_concurrent must be >= 1".to_string()));
        }
        if spec.targets.is_empty() {
            return Err(invalid("at least one target is required".to_string()));
        }

        Ok(Self {
            name: spec.name,
            frequency: spec.frequency,
            pages_range: spec.pages_range,
            priority: spec.priority,
            jitter: spec.jitter,
            max_concurrent: spec.max_concurrent,
            proxy_rotation: spec.proxy_rotation,
            stealth_mode: spec.stealth_mode,
            targets: spec.targets,
        })
    }
}

impl Tier {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frequency(&self) -> Duration {
        self.frequency
    }

    pub fn frequency_hours(&self) -> f64 {
        self.frequency.as_secs_f64() / 3600.0
    }

    pub fn pages_range(&self) -> (u32, u32) {
        self.pages_range
    }

    pub fn priority(&self) -> f64 {
        self.priority
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn proxy_rotation(&self) -> bool {
        self.proxy_rotation
    }

    pub fn stealth_mode(&self) -> bool {
        self.stealth_mode
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// 抖动后的间隔上下界（秒）
    pub fn interval_bounds_secs(&self) -> (f64, f64) {
        let base = self.frequency.as_secs_f64();
        let spread = base * self.jitter;
        (base - spread, base + spread)
    }

    /// 最长可能的抖动间隔
    pub fn max_interval(&self) -> chrono::Duration {
        let (_, high) = self.interval_bounds_secs();
        chrono::Duration::milliseconds((high * 1000.0).ceil() as i64)
    }
}

fn default_success_rate() -> f64 {
    1.0
}

/// 层级运行状态
///
/// 每个层级一份，仅在该层级的任务结束后由调度器更新，
/// 持久化到状态文件。缺失字段按默认值补齐。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierExecutionState {
    pub last_run: Option<DateTime<Utc>>,
    pub next_scheduled: Option<DateTime<Utc>>,
    pub executions_today: u32,
    /// 指数平滑后的成功率，始终在 [0, 1]
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,
    /// 平滑后的平均执行时长（秒）
    pub avg_execution_secs: f64,
    pub pages_scraped_total: u64,
    pub products_extracted_total: u64,
}

impl Default for TierExecutionState {
    fn default() -> Self {
        Self {
            last_run: None,
            next_scheduled: None,
            executions_today: 0,
            success_rate: default_success_rate(),
            avg_execution_secs: 0.0,
            pages_scraped_total: 0,
            products_extracted_total: 0,
        }
    }
}

/// 一次任务执行的摘要，写入层级的执行历史
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub task_id: String,
    pub tier: String,
    pub retailer: String,
    pub category: String,
    pub success: bool,
    #[serde(default)]
    pub products_found: u32,
    #[serde(default)]
    pub pages_scraped: u32,
    #[serde(default)]
    pub execution_secs: f64,
    pub finished_at: DateTime<Utc>,
}
