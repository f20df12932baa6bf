// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 基础设施层模块
///
/// 该模块包含系统的技术实现细节，依赖于领域层的抽象接口：
/// - 指标（metrics）：Prometheus 指标导出
/// - 存储（storage）：运行状态与指标快照的文件存储
pub mod metrics;
pub mod storage;
