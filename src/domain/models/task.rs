// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::profile::{IdentityProfile, NavigationPattern, ProxyEndpoint, ScrollBehavior};
use super::schedule::ScheduledItem;
use super::DomainError;

/// 任务状态枚举
///
/// 状态转换遵循以下流程：
/// Pending → Running → Completed/Failed，
/// 仍有重试次数的 Failed 任务可以重新回到 Pending。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 等待中，尚未到计划时间或等待资源
    #[default]
    Pending,
    /// 执行中
    Running,
    /// 已完成
    Completed,
    /// 已失败
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(()),
        }
    }
}

/// 抓取失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// 网络错误（连接失败、重置等）
    Network,
    /// 超时
    Timeout,
    /// 被目标站点封禁
    Blocked,
    /// 遇到验证码
    Captcha,
    /// 代理不可用
    Proxy,
    /// 页面内容解析失败
    Extraction,
    /// 协作方明确拒绝（例如不支持的零售商），重试无意义
    Rejected,
    /// 回调内部错误或崩溃
    Internal,
}

impl FailureCause {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureCause::Rejected)
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            FailureCause::Network => "network",
            FailureCause::Timeout => "timeout",
            FailureCause::Blocked => "blocked",
            FailureCause::Captcha => "captcha",
            FailureCause::Proxy => "proxy",
            FailureCause::Extraction => "extraction",
            FailureCause::Rejected => "rejected",
            FailureCause::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// 抓取回调的成功返回
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ScrapeReport {
    pub products_found: u32,
    pub pages_scraped: u32,
    pub execution_secs: f64,
}

/// 抓取回调的失败返回
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{cause} failure: {message}")]
pub struct ScrapeFailure {
    pub cause: FailureCause,
    pub message: String,
}

impl ScrapeFailure {
    pub fn new(cause: FailureCause, message: impl Into<String>) -> Self {
        Self {
            cause,
            message: message.into(),
        }
    }
}

/// 任务执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub products_found: u32,
    pub pages_scraped: u32,
    pub execution_secs: f64,
    pub failure: Option<ScrapeFailure>,
    pub finished_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn succeeded(report: &ScrapeReport, finished_at: DateTime<Utc>) -> Self {
        Self {
            success: true,
            products_found: report.products_found,
            pages_scraped: report.pages_scraped,
            execution_secs: report.execution_secs,
            failure: None,
            finished_at,
        }
    }

    pub fn failed(failure: ScrapeFailure, execution_secs: f64, finished_at: DateTime<Utc>) -> Self {
        Self {
            success: false,
            products_found: 0,
            pages_scraped: 0,
            execution_secs,
            failure: Some(failure),
            finished_at,
        }
    }
}

/// 人类行为延迟计划（秒）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayPlan {
    pub page_load_secs: f64,
    pub between_pages_secs: f64,
    pub category_switch_secs: f64,
}

/// 反检测配置包，随任务一起交给抓取回调
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntiDetectionBundle {
    pub identity: IdentityProfile,
    pub headers: BTreeMap<String, String>,
    pub delays: DelayPlan,
    pub navigation: NavigationPattern,
    /// 1 起始的页码访问顺序
    pub page_order: Vec<u32>,
    pub scroll: ScrollBehavior,
    /// 执行时才分配
    pub proxy: Option<ProxyEndpoint>,
}

/// 执行任务
///
/// 由计划项展开而来，由调度器独占；
/// 每个任务在自己的执行上下文中写入结果。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTask {
    pub id: String,
    pub retailer: String,
    pub category: String,
    pub url: String,
    pub tier: String,
    pub scheduled_time: DateTime<Utc>,
    pub priority: f64,
    pub pages_to_scrape: u32,
    pub anti_detection: AntiDetectionBundle,
    pub retries_remaining: u32,
    /// 已开始的执行次数
    pub attempts: u32,
    pub status: TaskStatus,
    pub result: Option<TaskResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionTask {
    /// 从计划项创建任务
    ///
    /// # 参数
    ///
    /// * `item` - 计划项
    /// * `bundle` - 反检测配置包
    /// * `max_retries` - 重试预算
    /// * `now` - 创建时间
    pub fn from_item(
        item: ScheduledItem,
        bundle: AntiDetectionBundle,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let short_id: String = item.randomization.execution_id.chars().take(8).collect();
        Self {
            id: format!("{}_{}_{}", item.retailer, item.category, short_id),
            retailer: item.retailer,
            category: item.category,
            url: item.url,
            tier: item.tier,
            scheduled_time: item.scheduled_time,
            priority: item.priority,
            pages_to_scrape: item.pages_to_scrape,
            anti_detection: bundle,
            retries_remaining: max_retries,
            attempts: 0,
            status: TaskStatus::Pending,
            result: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// 计划时间已到且仍在等待
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.scheduled_time <= now
    }

    /// 开始执行任务
    ///
    /// # 返回值
    ///
    /// * `Ok(ExecutionTask)` - 状态转换成功
    /// * `Err(DomainError)` - 任务不处于 Pending
    pub fn start(mut self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        match self.status {
            TaskStatus::Pending => {
                self.status = TaskStatus::Running;
                self.started_at = Some(now);
                self.attempts += 1;
                Ok(self)
            }
            other => Err(DomainError::InvalidStateTransition(format!(
                "cannot start task {} from {}",
                self.id, other
            ))),
        }
    }

    /// 标记任务成功完成
    pub fn complete(mut self, result: TaskResult) -> Result<Self, DomainError> {
        match self.status {
            TaskStatus::Running => {
                self.status = TaskStatus::Completed;
                self.completed_at = Some(result.finished_at);
                self.result = Some(result);
                Ok(self)
            }
            other => Err(DomainError::InvalidStateTransition(format!(
                "cannot complete task {} from {}",
                self.id, other
            ))),
        }
    }

    /// 标记任务失败
    pub fn fail(mut self, result: TaskResult) -> Result<Self, DomainError> {
        match self.status {
            TaskStatus::Running => {
                self.status = TaskStatus::Failed;
                self.completed_at = Some(result.finished_at);
                self.result = Some(result);
                Ok(self)
            }
            other => Err(DomainError::InvalidStateTransition(format!(
                "cannot fail task {} from {}",
                self.id, other
            ))),
        }
    }

    /// 消耗一次重试，重新进入等待状态
    pub fn reschedule(mut self, at: DateTime<Utc>) -> Result<Self, DomainError> {
        if self.status != TaskStatus::Failed || self.retries_remaining == 0 {
            return Err(DomainError::InvalidStateTransition(format!(
                "task {} cannot be retried (status {}, retries left {})",
                self.id, self.status, self.retries_remaining
            )));
        }
        self.retries_remaining -= 1;
        self.status = TaskStatus::Pending;
        self.scheduled_time = at;
        self.started_at = None;
        self.completed_at = None;
        self.result = None;
        self.anti_detection.proxy = None;
        Ok(self)
    }
}
