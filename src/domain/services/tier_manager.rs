// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::domain::models::metrics::{TierStatus, TierStatusSummary};
use crate::domain::models::schedule::{RandomizationBag, ScheduledItem};
use crate::domain::models::state::{PersistedState, RandomizationState};
use crate::domain::models::task::{ExecutionTask, TaskResult};
use crate::domain::models::tier::{ExecutionRecord, Tier, TierExecutionState};
use crate::domain::models::DomainError;
use crate::engines::anti_detection::AntiDetectionSystem;
use crate::utils::clock::Clock;
use crate::utils::random::SharedRng;

/// 调度相关的可调常量
#[derive(Debug, Clone)]
pub struct SchedulingTunables {
    /// 成功时新样本在成功率中的权重
    pub success_smoothing: f64,
    /// 失败时成功率的乘性衰减
    pub failure_decay: f64,
    /// 新样本在平均执行时长中的权重
    pub duration_smoothing: f64,
    /// 故意选择第二高分层级的概率
    pub alternate_tier_probability: f64,
    /// 同一批次内相邻计划项之间的间隔范围
    pub schedule_gap: (Duration, Duration),
    /// 每隔多少个批次插入一次模式打断
    pub pattern_break_every: (u32, u32),
    /// 模式打断时整批推迟的时长
    pub pattern_break_pause: (Duration, Duration),
    /// 保留的最近执行记录数
    pub history_limit: usize,
}

impl Default for SchedulingTunables {
    fn default() -> Self {
        Self {
            success_smoothing: 0.05,
            failure_decay: 0.9,
            duration_smoothing: 0.2,
            alternate_tier_probability: 0.15,
            schedule_gap: (Duration::from_secs(30), Duration::from_secs(300)),
            pattern_break_every: (5, 7),
            pattern_break_pause: (Duration::from_secs(300), Duration::from_secs(900)),
            history_limit: 50,
        }
    }
}

impl SchedulingTunables {
    pub fn validate(&self) -> Result<(), DomainError> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(DomainError::ValidationError(format!(
                    "{} must be within [0, 1], got {}",
                    name, v
                )))
            }
        };
        unit("success_smoothing", self.success_smoothing)?;
        unit("failure_decay", self.failure_decay)?;
        unit("duration_smoothing", self.duration_smoothing)?;
        unit("alternate_tier_probability", self.alternate_tier_probability)?;

        let (gap_min, gap_max) = self.schedule_gap;
        if gap_min.is_zero() || gap_min > gap_max {
            return Err(DomainError::ValidationError(format!(
                "schedule gap ({:?}, {:?}) must be positive and ordered",
                gap_min, gap_max
            )));
        }
        let (every_min, every_max) = self.pattern_break_every;
        if every_min == 0 || every_min > every_max {
            return Err(DomainError::ValidationError(
                "pattern break cadence must satisfy 1 <= min <= max".to_string(),
            ));
        }
        if self.pattern_break_pause.0 > self.pattern_break_pause.1 {
            return Err(DomainError::ValidationError(
                "pattern break pause range is inverted".to_string(),
            ));
        }
        Ok(())
    }
}

/// 层级管理器
///
/// 判断层级是否到期、挑选下一个要运行的层级、
/// 为层级生成带抖动的执行计划，并维护每个层级的运行状态。
pub struct TierManager {
    tiers: Vec<Tier>,
    states: HashMap<String, TierExecutionState>,
    outstanding: HashMap<String, usize>,
    randomization: RandomizationState,
    history: VecDeque<ExecutionRecord>,
    tunables: SchedulingTunables,
    rng: SharedRng,
    clock: Arc<dyn Clock>,
}

impl TierManager {
    /// 创建层级管理器
    ///
    /// # 参数
    ///
    /// * `tiers` - 层级定义，名称必须唯一
    /// * `tunables` - 可调常量
    /// * `rng` - 共享随机源
    /// * `clock` - 时钟
    ///
    /// # 返回值
    ///
    /// * `Ok(TierManager)` - 创建成功
    /// * `Err(DomainError)` - 层级为空、名称重复或常量非法
    pub fn new(
        tiers: Vec<Tier>,
        tunables: SchedulingTunables,
        rng: SharedRng,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DomainError> {
        tunables.validate()?;
        if tiers.is_empty() {
            return Err(DomainError::ValidationError(
                "at least one tier must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for tier in &tiers {
            if !seen.insert(tier.name().to_string()) {
                return Err(DomainError::ValidationError(format!(
                    "duplicate tier name '{}'",
                    tier.name()
                )));
            }
        }

        let states = tiers
            .iter()
            .map(|t| (t.name().to_string(), TierExecutionState::default()))
            .collect();

        for tier in &tiers {
            info!(
                "Tier {}: {} targets every {:.1}h, pages {}-{}, jitter ±{:.0}%",
                tier.name(),
                tier.targets().len(),
                tier.frequency_hours(),
                tier.pages_range().0,
                tier.pages_range().1,
                tier.jitter() * 100.0
            );
        }

        Ok(Self {
            tiers,
            states,
            outstanding: HashMap::new(),
            randomization: RandomizationState::default(),
            history: VecDeque::new(),
            tunables,
            rng,
            clock,
        })
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    pub fn tier(&self, name: &str) -> Option<&Tier> {
        self.tiers.iter().find(|t| t.name() == name)
    }

    pub fn state(&self, name: &str) -> Option<&TierExecutionState> {
        self.states.get(name)
    }

    pub fn tunables(&self) -> &SchedulingTunables {
        &self.tunables
    }

    pub fn history(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.history.iter()
    }

    /// 层级是否到期
    ///
    /// 每次判断都重新在 `频率 ± 频率×抖动` 内均匀抽取间隔，
    /// 外部观察者无法推断出固定周期。从未运行过的层级立即到期。
    pub fn is_due(&self, tier_name: &str) -> bool {
        let Some(tier) = self.tier(tier_name) else {
            return false;
        };
        let Some(last_run) = self.states.get(tier_name).and_then(|s| s.last_run) else {
            return true;
        };

        let (low, high) = tier.interval_bounds_secs();
        let interval = self.rng.uniform(low, high);
        let elapsed = (self.clock.now() - last_run).num_milliseconds() as f64 / 1000.0;
        elapsed >= interval
    }

    fn urgency(&self, tier: &Tier, now: DateTime<Utc>) -> f64 {
        match self.states.get(tier.name()).and_then(|s| s.last_run) {
            Some(last_run) => {
                let hours_since = (now - last_run).num_milliseconds() as f64 / 3_600_000.0;
                let frequency = tier.frequency_hours();
                (hours_since - frequency).max(0.0) / frequency
            }
            None => 1.0,
        }
    }

    /// 选出下一个要运行的层级
    ///
    /// 在所有到期且没有未完成批次的层级中按 `优先级 + 紧迫度` 排序；
    /// 以一个小概率故意选择第二名，避免选择顺序本身成为指纹。
    pub fn select_next_due_tier(&self) -> Option<&Tier> {
        let now = self.clock.now();
        let mut candidates: Vec<(&Tier, f64)> = self
            .tiers
            .iter()
            .filter(|t| self.outstanding(t.name()) == 0)
            .filter(|t| self.is_due(t.name()))
            .map(|t| (t, t.priority() + self.urgency(t, now)))
            .collect();

        if candidates.is_empty() {
            return None;
        }
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

        if candidates.len() > 1 && self.rng.chance(self.tunables.alternate_tier_probability) {
            debug!(
                "Picking alternate tier {} over {}",
                candidates[1].0.name(),
                candidates[0].0.name()
            );
            return Some(candidates[1].0);
        }
        Some(candidates[0].0)
    }

    /// 为层级生成执行计划
    ///
    /// 目标顺序随机打乱，从当前时刻开始依次排布，
    /// 相邻计划项之间插入一个严格为正的随机间隔。
    ///
    /// # 参数
    ///
    /// * `tier_name` - 层级名称
    /// * `anti_detection` - 提供身份的反检测系统
    ///
    /// # 返回值
    ///
    /// * `Ok(Vec<ScheduledItem>)` - 计划项，计划时间单调不减
    /// * `Err(DomainError)` - 层级不存在
    pub fn generate_schedule(
        &self,
        tier_name: &str,
        anti_detection: &AntiDetectionSystem,
    ) -> Result<Vec<ScheduledItem>, DomainError> {
        let tier = self
            .tier(tier_name)
            .ok_or_else(|| DomainError::UnknownTier(tier_name.to_string()))?;

        let mut targets = tier.targets().to_vec();
        self.rng.shuffle(&mut targets);

        let (min_pages, max_pages) = tier.pages_range();
        let (gap_min, gap_max) = self.tunables.schedule_gap;
        let mut scheduled_time = self.clock.now();
        let mut items = Vec::with_capacity(targets.len());

        for (idx, target) in targets.into_iter().enumerate() {
            if idx > 0 {
                let gap = self.rng.duration_between(gap_min, gap_max);
                scheduled_time += chrono::Duration::milliseconds(gap.as_millis() as i64);
            }

            let identity = if tier.stealth_mode() {
                anti_detection.pick_identity()
            } else {
                anti_detection.session_identity()
            };
            let pages = self.rng.range_u32(min_pages, max_pages);

            items.push(ScheduledItem {
                retailer: target.retailer,
                category: target.category,
                url: target.url,
                tier: tier.name().to_string(),
                priority: tier.priority() + target.priority,
                pages_to_scrape: pages,
                scheduled_time,
                randomization: RandomizationBag {
                    identity,
                    pages,
                    original_range: (min_pages, max_pages),
                    proxy_enabled: tier.proxy_rotation(),
                    stealth_mode: tier.stealth_mode(),
                    execution_id: self.rng.uuid().simple().to_string(),
                },
            });
        }

        debug!("Generated {} scheduled items for tier {}", items.len(), tier.name());
        Ok(items)
    }

    /// 模式打断
    ///
    /// 每生成若干个批次后返回一次额外的整批推迟时长。
    pub fn apply_pattern_breaking(&mut self) -> Option<Duration> {
        let (every_min, every_max) = self.tunables.pattern_break_every;
        self.randomization.pattern_break_counter += 1;
        let threshold = *self
            .randomization
            .next_pattern_break_at
            .get_or_insert_with(|| self.rng.range_u32(every_min, every_max));

        if self.randomization.pattern_break_counter < threshold {
            return None;
        }

        self.randomization.pattern_break_counter = 0;
        self.randomization.next_pattern_break_at = None;
        let (pause_min, pause_max) = self.tunables.pattern_break_pause;
        let pause = self.rng.duration_between(pause_min, pause_max);
        info!("Pattern break: delaying next batch by {:.0}s", pause.as_secs_f64());
        Some(pause)
    }

    /// 记录一个批次已转换为任务
    pub fn mark_batch_scheduled(&mut self, tier_name: &str, tasks: usize) {
        *self.outstanding.entry(tier_name.to_string()).or_insert(0) += tasks;
    }

    /// 批次中的一个任务到达终态
    pub fn release_task(&mut self, tier_name: &str) {
        if let Some(count) = self.outstanding.get_mut(tier_name) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn outstanding(&self, tier_name: &str) -> usize {
        self.outstanding.get(tier_name).copied().unwrap_or(0)
    }

    /// 记录任务完成（成功或失败）
    ///
    /// 成功时成功率向 1 平滑靠拢并更新平均时长和累计计数；
    /// 失败时成功率乘性衰减而不是清零。
    pub fn record_completion(
        &mut self,
        task: &ExecutionTask,
        result: &TaskResult,
    ) -> Result<(), DomainError> {
        let (low, high) = self
            .tier(&task.tier)
            .ok_or_else(|| DomainError::UnknownTier(task.tier.clone()))?
            .interval_bounds_secs();
        let next_interval = self.rng.uniform(low, high);
        let now = self.clock.now();
        let tunables = self.tunables.clone();

        let state = self.states.entry(task.tier.clone()).or_default();
        state.last_run = Some(now);
        state.executions_today += 1;

        if result.success {
            state.success_rate = (state.success_rate * (1.0 - tunables.success_smoothing)
                + tunables.success_smoothing)
                .min(1.0);
            state.avg_execution_secs = if state.avg_execution_secs == 0.0 {
                result.execution_secs
            } else {
                state.avg_execution_secs * (1.0 - tunables.duration_smoothing)
                    + result.execution_secs * tunables.duration_smoothing
            };
            state.pages_scraped_total += u64::from(result.pages_scraped);
            state.products_extracted_total += u64::from(result.products_found);
        } else {
            state.success_rate *= tunables.failure_decay;
        }
        state.success_rate = state.success_rate.clamp(0.0, 1.0);
        state.next_scheduled =
            Some(now + chrono::Duration::milliseconds((next_interval * 1000.0) as i64));

        self.history.push_back(ExecutionRecord {
            task_id: task.id.clone(),
            tier: task.tier.clone(),
            retailer: task.retailer.clone(),
            category: task.category.clone(),
            success: result.success,
            products_found: result.products_found,
            pages_scraped: result.pages_scraped,
            execution_secs: result.execution_secs,
            finished_at: now,
        });
        while self.history.len() > self.tunables.history_limit {
            self.history.pop_front();
        }

        Ok(())
    }

    /// 距离下一个层级可能到期还有多久
    ///
    /// 所有层级都有未完成批次时返回 `None`。
    pub fn time_until_next_due(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.tiers
            .iter()
            .filter(|t| self.outstanding(t.name()) == 0)
            .map(|t| match self.states.get(t.name()).and_then(|s| s.last_run) {
                None => Duration::ZERO,
                Some(last_run) => {
                    let (low, _) = t.interval_bounds_secs();
                    let earliest = last_run + chrono::Duration::milliseconds((low * 1000.0) as i64);
                    (earliest - now).to_std().unwrap_or(Duration::ZERO)
                }
            })
            .min()
    }

    /// 重置每日计数
    pub fn reset_daily_counters(&mut self) {
        for state in self.states.values_mut() {
            state.executions_today = 0;
        }
        info!("Reset daily execution counters for {} tiers", self.states.len());
    }

    pub fn randomization_state(&self) -> &RandomizationState {
        &self.randomization
    }

    /// 导出可持久化的状态
    pub fn snapshot(&self) -> PersistedState {
        PersistedState {
            tier_executions: self
                .states
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            randomization_state: self.randomization.clone(),
            execution_history: self.history.iter().cloned().collect(),
            last_save: Some(self.clock.now()),
        }
    }

    /// 从持久化状态恢复，未知层级被忽略
    pub fn restore(&mut self, state: PersistedState) {
        for (name, mut execution) in state.tier_executions {
            if !self.states.contains_key(&name) {
                debug!("Ignoring persisted state for unknown tier {}", name);
                continue;
            }
            execution.success_rate = execution.success_rate.clamp(0.0, 1.0);
            self.states.insert(name, execution);
        }
        self.randomization = state.randomization_state;

        let skip = state
            .execution_history
            .len()
            .saturating_sub(self.tunables.history_limit);
        self.history = state.execution_history.into_iter().skip(skip).collect();
    }

    /// 层级状态摘要
    pub fn status_summary(&self) -> TierStatusSummary {
        let tiers: BTreeMap<String, TierStatus> = self
            .tiers
            .iter()
            .map(|tier| {
                let status = TierStatus {
                    tier: tier.clone(),
                    state: self.states.get(tier.name()).cloned().unwrap_or_default(),
                    target_count: tier.targets().len(),
                    outstanding_tasks: self.outstanding(tier.name()),
                };
                (tier.name().to_string(), status)
            })
            .collect();

        TierStatusSummary {
            tiers,
            pattern_break_counter: self.randomization.pattern_break_counter,
            history_len: self.history.len(),
        }
    }
}
