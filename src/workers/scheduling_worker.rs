// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::domain::models::metrics::SchedulerState;
use crate::queue::core::{SchedulerCore, SchedulingOutcome};
use crate::utils::errors::WorkerError;
use crate::workers::worker::{sleep_or_cancelled, Worker};

/// 层级调度循环
///
/// 挑选到期层级并展开为任务；没有到期层级时休眠，
/// 休眠前按经过时间折算的概率插入一次会话休息。
pub struct SchedulingWorker {
    core: Arc<SchedulerCore>,
}

impl SchedulingWorker {
    pub fn new(core: Arc<SchedulerCore>) -> Self {
        Self { core }
    }
}

#[async_trait]
impl Worker for SchedulingWorker {
    async fn run(&self, token: CancellationToken) -> Result<(), WorkerError> {
        let config = self.core.config().clone();

        while !token.is_cancelled() {
            if self.core.state() != SchedulerState::Running {
                if sleep_or_cancelled(&token, config.dispatch_interval).await {
                    break;
                }
                continue;
            }

            let wait = match self.core.schedule_next_batch() {
                Ok(SchedulingOutcome::Scheduled { tier, tasks }) => {
                    debug!("Tier {} expanded into {} tasks", tier, tasks);
                    config.dispatch_interval
                }
                Ok(SchedulingOutcome::Idle { wait }) => {
                    debug!("No tier due, sleeping {:.0}s", wait.as_secs_f64());
                    match self.core.maybe_session_break(wait) {
                        Some(pause) => wait + pause,
                        None => wait,
                    }
                }
                Err(e) => {
                    error!("Scheduling failed: {}", e);
                    config.idle_sleep_floor
                }
            };

            if sleep_or_cancelled(&token, wait).await {
                break;
            }
        }

        info!("Scheduling loop exiting");
        Ok(())
    }

    fn name(&self) -> &str {
        "scheduling-worker"
    }
}
