// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::profile::IdentityProfile;

/// 计划项
///
/// 某个层级一次运行中展开出的单个 (零售商, 品类) 目标。
/// 同一批次内的计划时间单调不减，不做持久化。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledItem {
    pub retailer: String,
    pub category: String,
    pub url: String,
    pub tier: String,
    /// 层级权重加品类权重
    pub priority: f64,
    pub pages_to_scrape: u32,
    pub scheduled_time: DateTime<Utc>,
    pub randomization: RandomizationBag,
}

/// 随机化参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomizationBag {
    pub identity: IdentityProfile,
    pub pages: u32,
    pub original_range: (u32, u32),
    pub proxy_enabled: bool,
    pub stealth_mode: bool,
    pub execution_id: String,
}
