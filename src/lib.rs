// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 应用程序模块
///
/// 把调度核心接到零售商编排器的用例
pub mod application;

/// 配置模块
///
/// 处理应用程序的配置设置、环境变量和内置目录
pub mod config;

/// 领域模块
///
/// 包含核心业务实体、服务和仓库接口
pub mod domain;

/// 引擎模块
///
/// 反检测系统、代理池、健康探测和抓取回调接缝
pub mod engines;

/// 基础设施模块
///
/// 提供状态文件存储与指标导出
pub mod infrastructure;

/// 队列模块
///
/// 实现任务队列、资源管理和调度功能
pub mod queue;

/// 工具模块
///
/// 提供通用的工具函数和辅助功能
pub mod utils;

/// 工作器模块
///
/// 实现后台循环和工作器管理
pub mod workers;
