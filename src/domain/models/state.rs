// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use super::tier::{ExecutionRecord, TierExecutionState};

/// 全局随机化状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomizationState {
    /// 自上次模式打断以来生成的批次数
    pub pattern_break_counter: u32,
    /// 触发下一次模式打断的批次数
    pub next_pattern_break_at: Option<u32>,
    pub last_proxy_rotation: Option<DateTime<Utc>>,
    pub last_identity_rotation: Option<DateTime<Utc>>,
}

/// 持久化的运行状态
///
/// 无版本号：未知字段忽略，缺失字段取默认值。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub tier_executions: BTreeMap<String, TierExecutionState>,
    pub randomization_state: RandomizationState,
    /// 单条记录损坏时只丢弃该条
    #[serde(deserialize_with = "lenient_history")]
    pub execution_history: Vec<ExecutionRecord>,
    pub last_save: Option<DateTime<Utc>>,
}

fn lenient_history<'de, D>(deserializer: D) -> Result<Vec<ExecutionRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
    let total = raw.len();
    let records: Vec<ExecutionRecord> = raw
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect();
    if records.len() < total {
        warn!(
            "Dropped {} malformed execution history entries",
            total - records.len()
        );
    }
    Ok(records)
}
