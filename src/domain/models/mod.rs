// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use thiserror::Error;

/// 领域模型模块
///
/// 该模块定义了调度核心的业务实体，包括：
/// - 层级（tier）：命名的调度策略及其运行状态
/// - 计划项（schedule）：某次层级运行展开出的单个目标
/// - 执行任务（task）：可调度、可重试的抓取工作单元
/// - 反检测素材（profile）：代理、浏览器身份、导航模式
/// - 指标（metrics）：只读的状态与指标快照
/// - 持久化状态（state）：重启后恢复的层级运行状态
pub mod metrics;
pub mod profile;
pub mod schedule;
pub mod state;
pub mod task;
pub mod tier;

/// 领域错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 无效的状态转换，当任务状态转换不符合业务规则时发生
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// 验证错误，当配置或输入数据不符合领域规则时发生
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// 未知层级
    #[error("Unknown tier: {0}")]
    UnknownTier(String),
}
