// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::utils::errors::WorkerError;

/// Worker trait定义
///
/// 所有后台循环都必须实现此trait，收到取消信号后应尽快返回
#[async_trait]
pub trait Worker: Send + Sync {
    /// 运行工作器，直到 `token` 被取消
    async fn run(&self, token: CancellationToken) -> Result<(), WorkerError>;

    /// 获取工作器名称
    fn name(&self) -> &str;
}

/// 休眠指定时长，期间被取消则提前返回 `true`
pub async fn sleep_or_cancelled(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
