// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::tier::{Tier, TierExecutionState};

/// 调度器整体状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    #[default]
    Idle,
    Running,
    Paused,
    Maintenance,
    Error,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Running => "running",
            SchedulerState::Paused => "paused",
            SchedulerState::Maintenance => "maintenance",
            SchedulerState::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// 单个零售商的表现
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetailerPerformance {
    pub tasks_executed: u64,
    pub successful_tasks: u64,
    pub success_rate: f64,
    pub avg_products_per_task: f64,
    pub avg_execution_secs: f64,
    pub last_successful_execution: Option<DateTime<Utc>>,
}

/// 单个层级的表现
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierPerformance {
    pub tasks_executed: u64,
    pub successful_tasks: u64,
    pub products_scraped: u64,
    pub tasks_today: u64,
}

/// 调度器指标
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerMetrics {
    /// 执行尝试总数（含重试）
    pub total_tasks_executed: u64,
    pub successful_tasks: u64,
    pub failed_attempts: u64,
    /// 重试耗尽后终止的任务数
    pub terminally_failed_tasks: u64,
    pub retries_scheduled: u64,
    pub total_products_scraped: u64,
    pub uptime_percentage: f64,
    pub anti_detection_effectiveness: f64,
    pub retailers_performance: BTreeMap<String, RetailerPerformance>,
    pub tiers_performance: BTreeMap<String, TierPerformance>,
}

/// 反检测指标快照，只用于观测
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AntiDetectionMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub blocked_requests: u64,
    pub captcha_encounters: u64,
    pub proxy_rotations: u64,
    pub identity_rotations: u64,
    pub pattern_breaks: u64,
    pub human_delays_applied: u64,
    pub success_rate: f64,
    pub working_proxies: usize,
    pub total_proxies: usize,
    pub identity_profiles: usize,
    pub session_fingerprint: String,
}

/// 资源占用
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub current_load: usize,
    pub max_concurrent: usize,
    pub utilization_percent: f64,
    pub per_target_load: BTreeMap<String, usize>,
    pub per_tier_load: BTreeMap<String, usize>,
}

/// 队列规模
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSizes {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
}

/// 层级状态摘要中的一项
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierStatus {
    pub tier: Tier,
    pub state: TierExecutionState,
    pub target_count: usize,
    pub outstanding_tasks: usize,
}

/// 层级状态摘要
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierStatusSummary {
    pub tiers: BTreeMap<String, TierStatus>,
    pub pattern_break_counter: u32,
    pub history_len: usize,
}

/// 调度器状态快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub state: SchedulerState,
    pub uptime_hours: f64,
    pub resources: ResourceUsage,
    pub queues: QueueSizes,
    pub running_tasks: Vec<String>,
    pub metrics: SchedulerMetrics,
    pub anti_detection: AntiDetectionMetrics,
    pub tiers: TierStatusSummary,
}

/// 写入指标文件的带时间戳快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub status: StatusSnapshot,
}
