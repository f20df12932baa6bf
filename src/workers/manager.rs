// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::models::metrics::SchedulerState;
use crate::queue::core::SchedulerCore;
use crate::utils::errors::{panic_message, WorkerError};
use crate::workers::Worker;

/// 工作管理器
///
/// 启动并监督调度器的后台循环。关键循环出错或崩溃时，
/// 调度器进入 Error 状态并触发 `fatal` 令牌。
pub struct WorkerManager {
    core: Arc<SchedulerCore>,
    token: CancellationToken,
    fatal: CancellationToken,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl WorkerManager {
    pub fn new(core: Arc<SchedulerCore>) -> Self {
        Self {
            core,
            token: CancellationToken::new(),
            fatal: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// 关键循环失败时被取消的令牌
    pub fn fatal_token(&self) -> CancellationToken {
        self.fatal.clone()
    }

    /// 启动一个工作器
    ///
    /// # 参数
    ///
    /// * `worker` - 工作器
    /// * `critical` - 是否为关键循环
    pub fn spawn(&mut self, worker: Arc<dyn Worker>, critical: bool) {
        let name = worker.name().to_string();
        let token = self.token.clone();
        let fatal = self.fatal.clone();
        let core = self.core.clone();

        let handle = tokio::spawn({
            let name = name.clone();
            async move {
                info!("Worker {} started", name);
                let outcome = AssertUnwindSafe(worker.run(token.clone()))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(WorkerError::Panicked(panic_message(payload))));

                match outcome {
                    Ok(()) => info!("Worker {} stopped", name),
                    Err(e) if critical && !token.is_cancelled() => {
                        error!("Critical worker {} failed: {}", name, e);
                        core.set_state(SchedulerState::Error);
                        fatal.cancel();
                    }
                    Err(e) => error!("Worker {} failed: {}", name, e),
                }
            }
        });
        self.handles.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// 取消所有工作器并等待其退出，超时后强制中止
    pub async fn shutdown(self, timeout: Duration) {
        info!("Shutting down {} workers...", self.handles.len());
        self.token.cancel();

        let names: Vec<String> = self.handles.iter().map(|(n, _)| n.clone()).collect();
        let aborters: Vec<_> = self.handles.iter().map(|(_, h)| h.abort_handle()).collect();
        let joined = futures::future::join_all(self.handles.into_iter().map(|(_, h)| h));

        match tokio::time::timeout(timeout, joined).await {
            Ok(_) => info!("Workers shut down successfully"),
            Err(_) => {
                warn!(
                    "Workers did not stop within {:?}, aborting: {}",
                    timeout,
                    names.join(", ")
                );
                for aborter in aborters {
                    aborter.abort();
                }
            }
        }
    }
}
