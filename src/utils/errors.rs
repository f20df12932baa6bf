// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use thiserror::Error;

use crate::config::settings::SettingsError;
use crate::domain::models::DomainError;
use crate::domain::repositories::state_repository::StorageError;

/// Worker错误类型
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("调度错误: {0}")]
    SchedulingError(String),

    #[error("存储错误: {0}")]
    StorageError(String),

    #[error("内部错误: {0}")]
    InternalError(String),

    #[error("任务崩溃: {0}")]
    Panicked(String),
}

/// 调度器错误类型
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// 从 panic 负载中提取可读的消息
pub fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
