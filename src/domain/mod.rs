// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域层模块
///
/// 该模块包含调度核心的业务逻辑，包括：
/// - 领域模型（models）：层级、计划项、任务、反检测素材
/// - 仓库接口（repositories）：运行状态持久化抽象接口
/// - 服务（services）：层级管理等领域服务
///
/// 领域层不依赖于任何外部实现。
pub mod models;
pub mod repositories;
pub mod services;
