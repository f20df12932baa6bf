// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::domain::models::metrics::MetricsSnapshot;
use crate::domain::models::state::PersistedState;
use crate::domain::repositories::state_repository::{StateRepository, StorageError};

/// 本地 JSON 文件存储实现
///
/// 运行状态和指标快照各写一个文件。写入先落到同目录的临时文件，
/// 再重命名覆盖目标，读取方不会看到写了一半的文件。
pub struct JsonFileStore {
    state_path: PathBuf,
    metrics_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(state_path: impl Into<PathBuf>, metrics_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            metrics_path: metrics_path.into(),
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn metrics_path(&self) -> &Path {
        &self.metrics_path
    }

    async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
        let data = serde_json::to_vec_pretty(value)?;

        // 确保目录存在
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, path).await?;
        debug!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }
}

#[async_trait]
impl StateRepository for JsonFileStore {
    async fn load_state(&self) -> Result<Option<PersistedState>, StorageError> {
        match fs::read(&self.state_path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn save_state(&self, state: &PersistedState) -> Result<(), StorageError> {
        let mut state = state.clone();
        state.last_save = Some(chrono::Utc::now());
        Self::write_json(&self.state_path, &state).await
    }

    async fn save_metrics(&self, snapshot: &MetricsSnapshot) -> Result<(), StorageError> {
        Self::write_json(&self.metrics_path, snapshot).await
    }
}

/// 测试用的内存存储实现
#[derive(Default)]
pub struct InMemoryStore {
    state: tokio::sync::RwLock<Option<PersistedState>>,
    metrics: tokio::sync::RwLock<Vec<serde_json::Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以已有状态初始化
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: tokio::sync::RwLock::new(Some(state)),
            metrics: Default::default(),
        }
    }

    pub async fn state(&self) -> Option<PersistedState> {
        self.state.read().await.clone()
    }

    /// 已写入的指标快照（JSON 形式）
    pub async fn metrics(&self) -> Vec<serde_json::Value> {
        self.metrics.read().await.clone()
    }
}

#[async_trait]
impl StateRepository for InMemoryStore {
    async fn load_state(&self) -> Result<Option<PersistedState>, StorageError> {
        Ok(self.state.read().await.clone())
    }

    async fn save_state(&self, state: &PersistedState) -> Result<(), StorageError> {
        *self.state.write().await = Some(state.clone());
        Ok(())
    }

    async fn save_metrics(&self, snapshot: &MetricsSnapshot) -> Result<(), StorageError> {
        let value = serde_json::to_value(snapshot)?;
        self.metrics.write().await.push(value);
        Ok(())
    }
}
