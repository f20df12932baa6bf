// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 配置模块
///
/// 处理调度器、反检测、存储与日志的配置，以及内置的层级与身份目录
pub mod catalog;
pub mod settings;
