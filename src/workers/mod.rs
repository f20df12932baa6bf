// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 工作器模块
///
/// 提供调度器的后台循环和工作器生命周期管理
/// 包括层级调度、任务派发、健康检查、每日维护和指标写入
pub mod dispatch_worker;
pub mod health_worker;
pub mod maintenance_worker;
pub mod manager;
pub mod metrics_worker;
pub mod scheduling_worker;
pub mod worker;

pub use worker::Worker;
