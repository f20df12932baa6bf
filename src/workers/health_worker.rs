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

/// 健康检查循环
pub struct HealthWorker {
    core: Arc<SchedulerCore>,
}

impl HealthWorker {
    pub fn new(core: Arc<SchedulerCore>) -> Self {
        Self { core }
    }
}

#[async_trait]
impl Worker for HealthWorker {
    async fn run(&self, token: CancellationToken) -> Result<(), WorkerError> {
        let interval = self.core.config().health_check_interval;
        while !sleep_or_cancelled(&token, interval).await {
            self.core.perform_health_check().await;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "health-worker"
    }
}
