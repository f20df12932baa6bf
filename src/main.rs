// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use pricetier::application::usecases::tiered_orchestration::shutdown_signal;
use pricetier::config::settings::Settings;
use pricetier::queue::scheduler::SchedulerBuilder;
use pricetier::utils::telemetry;
use tracing::info;

/// 主函数
///
/// 加载配置，启动调度器（未注册抓取回调时使用模拟执行器），
/// 收到 Ctrl-C 或 SIGTERM 后优雅停止
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration
    let settings = Settings::new()?;

    // 2. Initialize logging
    telemetry::init_telemetry(settings.telemetry.log_format);
    info!("Starting pricetier...");

    // 3. Initialize Prometheus Metrics
    if let Some(listen) = &settings.telemetry.metrics_listen {
        pricetier::infrastructure::metrics::init_metrics(listen)?;
    }

    // 4. Build scheduler
    let scheduler = SchedulerBuilder::from_settings(&settings)?.build()?;
    info!(
        "Scheduler configured with {} tiers",
        scheduler.status().tiers.tiers.len()
    );

    // 5. Run until shutdown
    scheduler.run_until(shutdown_signal()).await?;

    info!("pricetier stopped");
    Ok(())
}
