// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

/// 可注入、可设定种子的共享随机源
///
/// 层级管理器、反检测系统和调度器共享同一个实例，
/// 固定种子时整个调度过程（顺序、间隔、身份选择）可以复现。
#[derive(Clone)]
pub struct SharedRng {
    inner: Arc<Mutex<StdRng>>,
}

impl SharedRng {
    /// 使用操作系统熵源初始化
    pub fn from_entropy() -> Self {
        Self::from_rng(StdRng::from_os_rng())
    }

    /// 使用固定种子初始化
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            inner: Arc::new(Mutex::new(rng)),
        }
    }

    /// 在持有锁的情况下直接使用底层生成器
    pub fn with<R>(&self, f: impl FnOnce(&mut StdRng) -> R) -> R {
        let mut rng = self.inner.lock();
        f(&mut rng)
    }

    /// [0, 1) 区间内的均匀浮点数
    pub fn unit(&self) -> f64 {
        self.with(|rng| rng.random::<f64>())
    }

    /// 闭区间 [low, high] 内的均匀浮点数，区间颠倒时自动交换
    pub fn uniform(&self, low: f64, high: f64) -> f64 {
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        if low == high {
            return low;
        }
        self.with(|rng| rng.random_range(low..=high))
    }

    /// 闭区间 [low, high] 内的均匀整数
    pub fn range_u32(&self, low: u32, high: u32) -> u32 {
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        self.with(|rng| rng.random_range(low..=high))
    }

    /// 以概率 `p` 返回 true
    pub fn chance(&self, p: f64) -> bool {
        let p = if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 };
        self.with(|rng| rng.random_bool(p))
    }

    /// 闭区间内的均匀时长
    pub fn duration_between(&self, low: Duration, high: Duration) -> Duration {
        Duration::from_secs_f64(self.uniform(low.as_secs_f64(), high.as_secs_f64()))
    }

    pub fn shuffle<T>(&self, items: &mut [T]) {
        self.with(|rng| items.shuffle(rng));
    }

    /// 由随机源派生的 v4 UUID，种子固定时可复现
    pub fn uuid(&self) -> Uuid {
        let bytes = self.with(|rng| rng.random::<[u8; 16]>());
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }
}

impl std::fmt::Debug for SharedRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRng").finish_non_exhaustive()
    }
}

impl Default for SharedRng {
    fn default() -> Self {
        Self::from_entropy()
    }
}
