// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::{AddrParseError, SocketAddr};
use thiserror::Error;
use tracing::info;

/// 指标导出错误
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Invalid metrics address: {0}")]
    Address(#[from] AddrParseError),

    #[error("Failed to install Prometheus recorder: {0}")]
    Install(#[from] BuildError),
}

/// 启动 Prometheus 指标导出
///
/// # 参数
///
/// * `listen` - 监听地址，例如 `0.0.0.0:9000`
pub fn init_metrics(listen: &str) -> Result<(), MetricsError> {
    let addr: SocketAddr = listen.parse()?;
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();

    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

fn describe_metrics() {
    describe_counter!("scheduler_batches_total", "Tier batches expanded into tasks");
    describe_counter!("scheduler_tasks_total", "Task execution attempts by outcome");
    describe_counter!("scheduler_retries_total", "Failed attempts put back in the queue");
    describe_counter!(
        "scheduler_tasks_given_up_total",
        "Tasks that failed with no retries left"
    );
    describe_counter!("scheduler_products_total", "Products reported by scrape callbacks");
    describe_histogram!(
        "scheduler_task_duration_seconds",
        Unit::Seconds,
        "Scrape callback duration"
    );
    describe_gauge!("scheduler_pending_tasks", "Tasks waiting in the queue");
    describe_gauge!("scheduler_running_tasks", "Tasks currently executing");
    describe_counter!("anti_detection_blocked_total", "Requests blocked by retailers");
    describe_counter!("anti_detection_captcha_total", "Captcha encounters");
    describe_counter!("anti_detection_session_breaks_total", "Session breaks taken");
    describe_counter!("anti_detection_rotations_total", "Identity and proxy rotations");
    describe_counter!("proxy_health_checks_total", "Proxy probes by outcome");
    describe_gauge!("proxy_pool_working", "Proxies currently marked working");
}
