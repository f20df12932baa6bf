// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 队列模块
///
/// 提供任务队列和调度功能
/// 负责任务的排队、资源占位、派发和执行管理
pub mod core;
pub mod resources;
pub mod scheduler;
pub mod task_queue;

pub use scheduler::{IntelligentScheduler, SchedulerBuilder, SchedulerConfig};
