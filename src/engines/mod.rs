// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod anti_detection;
pub mod health_monitor;
pub mod proxy_pool;
pub mod reqwest_prober;
pub mod simulated;
pub mod traits;
