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

/// 每日维护循环
///
/// 定期检查是否进入维护窗口，每个日历日最多执行一次
pub struct MaintenanceWorker {
    core: Arc<SchedulerCore>,
}

impl MaintenanceWorker {
    pub fn new(core: Arc<SchedulerCore>) -> Self {
        Self { core }
    }
}

#[async_trait]
impl Worker for MaintenanceWorker {
    async fn run(&self, token: CancellationToken) -> Result<(), WorkerError> {
        let poll = self.core.config().maintenance_poll;
        loop {
            self.core.maybe_run_maintenance().await;
            if sleep_or_cancelled(&token, poll).await {
                return Ok(());
            }
        }
    }

    fn name(&self) -> &str {
        "maintenance-worker"
    }
}
