// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::domain::models::task::{ScrapeFailure, ScrapeReport};
use crate::engines::traits::{ScrapeExecutor, ScrapeRequest};
use crate::utils::random::SharedRng;

/// 模拟执行器
///
/// 未注册抓取回调时使用：随机休眠一段时间后返回合成的成功结果。
pub struct SimulatedExecutor {
    rng: SharedRng,
    duration: (Duration, Duration),
    products: (u32, u32),
}

impl SimulatedExecutor {
    pub fn new(rng: SharedRng) -> Self {
        Self {
            rng,
            duration: (Duration::from_secs(30), Duration::from_secs(120)),
            products: (15, 45),
        }
    }

    /// 覆盖模拟耗时范围
    pub fn with_duration(mut self, min: Duration, max: Duration) -> Self {
        self.duration = (min, max);
        self
    }
}

#[async_trait]
impl ScrapeExecutor for SimulatedExecutor {
    async fn execute(&self, request: &ScrapeRequest) -> Result<ScrapeReport, ScrapeFailure> {
        let pause = self.rng.duration_between(self.duration.0, self.duration.1);
        debug!(
            "Simulating {} for {:.1}s ({} pages)",
            request.task_id,
            pause.as_secs_f64(),
            request.pages_to_scrape
        );
        tokio::time::sleep(pause).await;

        Ok(ScrapeReport {
            products_found: self.rng.range_u32(self.products.0, self.products.1),
            pages_scraped: request.pages_to_scrape,
            execution_secs: pause.as_secs_f64(),
        })
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}
