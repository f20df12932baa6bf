// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::{BTreeMap, HashMap};

use crate::domain::models::metrics::ResourceUsage;

/// 资源管理器
///
/// 跟踪全局、单个零售商以及单个层级的并发占用，
/// 派发前用 [`ResourceManager::try_acquire`] 占位，任务结束后释放。
#[derive(Debug)]
pub struct ResourceManager {
    max_global: usize,
    max_per_target: usize,
    tier_caps: HashMap<String, usize>,
    current: usize,
    per_target: HashMap<String, usize>,
    per_tier: HashMap<String, usize>,
}

impl ResourceManager {
    /// 创建资源管理器
    ///
    /// # 参数
    ///
    /// * `max_global` - 全局并发上限
    /// * `max_per_target` - 单个零售商并发上限
    /// * `tier_caps` - 各层级并发上限，未列出的层级只受前两者约束
    pub fn new(max_global: usize, max_per_target: usize, tier_caps: HashMap<String, usize>) -> Self {
        Self {
            max_global,
            max_per_target,
            tier_caps,
            current: 0,
            per_target: HashMap::new(),
            per_tier: HashMap::new(),
        }
    }

    pub fn has_global_capacity(&self) -> bool {
        self.current < self.max_global
    }

    pub fn current_load(&self) -> usize {
        self.current
    }

    pub fn target_load(&self, retailer: &str) -> usize {
        self.per_target.get(retailer).copied().unwrap_or(0)
    }

    pub fn tier_load(&self, tier: &str) -> usize {
        self.per_tier.get(tier).copied().unwrap_or(0)
    }

    /// 是否还能为该零售商与层级接纳一个任务
    pub fn can_admit(&self, retailer: &str, tier: &str) -> bool {
        if !self.has_global_capacity() || self.target_load(retailer) >= self.max_per_target {
            return false;
        }
        match self.tier_caps.get(tier) {
            Some(cap) => self.tier_load(tier) < *cap,
            None => true,
        }
    }

    /// 占用一个执行位
    pub fn try_acquire(&mut self, retailer: &str, tier: &str) -> bool {
        if !self.can_admit(retailer, tier) {
            return false;
        }
        self.current += 1;
        *self.per_target.entry(retailer.to_string()).or_insert(0) += 1;
        *self.per_tier.entry(tier.to_string()).or_insert(0) += 1;
        true
    }

    /// 释放一个执行位
    pub fn release(&mut self, retailer: &str, tier: &str) {
        self.current = self.current.saturating_sub(1);
        if let Some(load) = self.per_target.get_mut(retailer) {
            *load = load.saturating_sub(1);
            if *load == 0 {
                self.per_target.remove(retailer);
            }
        }
        if let Some(load) = self.per_tier.get_mut(tier) {
            *load = load.saturating_sub(1);
            if *load == 0 {
                self.per_tier.remove(tier);
            }
        }
    }

    pub fn usage(&self) -> ResourceUsage {
        ResourceUsage {
            current_load: self.current,
            max_concurrent: self.max_global,
            utilization_percent: if self.max_global == 0 {
                0.0
            } else {
                self.current as f64 / self.max_global as f64 * 100.0
            },
            per_target_load: self
                .per_target
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect::<BTreeMap<_, _>>(),
            per_tier_load: self
                .per_tier
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect::<BTreeMap<_, _>>(),
        }
    }
}
