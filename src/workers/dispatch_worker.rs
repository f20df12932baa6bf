// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::queue::core::SchedulerCore;
use crate::utils::errors::WorkerError;
use crate::workers::worker::{sleep_or_cancelled, Worker};

/// 任务派发循环
///
/// 每轮尽可能多地派发就绪任务，受全局、零售商和层级并发上限约束
pub struct DispatchWorker {
    core: Arc<SchedulerCore>,
}

impl DispatchWorker {
    pub fn new(core: Arc<SchedulerCore>) -> Self {
        Self { core }
    }
}

#[async_trait]
impl Worker for DispatchWorker {
    async fn run(&self, token: CancellationToken) -> Result<(), WorkerError> {
        let interval = self.core.config().dispatch_interval;
        loop {
            while !token.is_cancelled() && self.core.try_dispatch_next() {}

            if sleep_or_cancelled(&token, interval).await {
                return Ok(());
            }
        }
    }

    fn name(&self) -> &str {
        "dispatch-worker"
    }
}
