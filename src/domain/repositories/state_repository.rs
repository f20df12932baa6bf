// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::models::metrics::MetricsSnapshot;
use crate::domain::models::state::PersistedState;

/// 存储错误类型
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// 存储错误
    #[error("Storage error: {0}")]
    Other(String),
}

/// 状态仓库特质
///
/// 运行状态与指标快照分别写入不同位置
#[async_trait]
pub trait StateRepository: Send + Sync {
    /// 读取运行状态，不存在时返回 `None`
    async fn load_state(&self) -> Result<Option<PersistedState>, StorageError>;

    /// 保存运行状态
    async fn save_state(&self, state: &PersistedState) -> Result<(), StorageError>;

    /// 保存指标快照
    async fn save_metrics(&self, snapshot: &MetricsSnapshot) -> Result<(), StorageError>;
}
