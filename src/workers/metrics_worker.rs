// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::queue::core::SchedulerCore;
use crate::utils::errors::WorkerError;
use crate::workers::worker::{sleep_or_cancelled, Worker};

/// 指标快照写入循环
pub struct MetricsWorker {
    core: Arc<SchedulerCore>,
}

impl MetricsWorker {
    pub fn new(core: Arc<SchedulerCore>) -> Self {
        Self { core }
    }
}

#[async_trait]
impl Worker for MetricsWorker {
    async fn run(&self, token: CancellationToken) -> Result<(), WorkerError> {
        let interval = self.core.config().metrics_interval;
        while !sleep_or_cancelled(&token, interval).await {
            if let Err(e) = self.core.save_metrics().await {
                warn!("Failed to save metrics snapshot: {}", e);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "metrics-worker"
    }
}
