// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use pricetier::config::catalog::default_identities;
use pricetier::domain::models::profile::{ProxyEndpoint, ProxyProtocol};
use pricetier::domain::models::task::{FailureCause, ScrapeFailure, ScrapeReport, TaskStatus};
use pricetier::engines::anti_detection::{AntiDetectionConfig, AntiDetectionSystem};
use pricetier::engines::reqwest_prober::ReqwestProber;
use pricetier::engines::traits::{EngineError, ProxyProber, ScrapeExecutor, ScrapeRequest};
use pricetier::utils::clock::SystemClock;
use pricetier::utils::random::SharedRng;

use super::helpers::{builder, fast_config, proxied_tier};

/// 在本地端口启动一个充当 HTTP 代理的服务，`/ip` 返回给定状态码
async fn spawn_proxy(status: StatusCode) -> u16 {
    let app = Router::new().route("/ip", get(move || async move { (status, "{\"origin\":\"127.0.0.1\"}") }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

fn local_proxy(port: u16) -> ProxyEndpoint {
    ProxyEndpoint::try_new("127.0.0.1", port, ProxyProtocol::Http).unwrap()
}

#[tokio::test]
async fn test_reqwest_prober_healthy_proxy() {
    let port = spawn_proxy(StatusCode::OK).await;
    let prober = ReqwestProber::new("http://probe.test/ip");

    let elapsed = prober
        .probe(&local_proxy(port), Duration::from_secs(5))
        .await
        .unwrap();
    assert!(elapsed < Duration::from_secs(5));
}

#[tokio::test]
async fn test_reqwest_prober_rejects_error_status() {
    let port = spawn_proxy(StatusCode::INTERNAL_SERVER_ERROR).await;
    let prober = ReqwestProber::new("http://probe.test/ip");

    let result = prober.probe(&local_proxy(port), Duration::from_secs(5)).await;
    assert!(matches!(result, Err(EngineError::UnexpectedStatus(500))));
}

#[tokio::test]
async fn test_reqwest_prober_unreachable_proxy() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let prober = ReqwestProber::new("http://probe.test/ip");

    let result = prober.probe(&local_proxy(port), Duration::from_secs(2)).await;
    assert!(result.is_err());
}

/// 按主机编排探测结果：`bad` 总是失败，`flaky` 交替成败，其余成功
struct ScriptedProber {
    calls: Mutex<HashMap<String, u32>>,
}

#[async_trait]
impl ProxyProber for ScriptedProber {
    async fn probe(&self, proxy: &ProxyEndpoint, _timeout: Duration) -> Result<Duration, EngineError> {
        let call = {
            let mut calls = self.calls.lock();
            let n = calls.entry(proxy.host.clone()).or_insert(0);
            *n += 1;
            *n
        };
        match proxy.host.as_str() {
            "bad" => Err(EngineError::Other("connection refused".to_string())),
            "flaky" if call % 2 == 0 => Err(EngineError::Timeout),
            _ => Ok(Duration::from_millis(25)),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[tokio::test]
async fn test_failing_proxy_is_never_selected_after_disable() {
    let proxies = ["good", "flaky", "bad"]
        .iter()
        .map(|host| ProxyEndpoint::try_new(*host, 8080, ProxyProtocol::Http).unwrap())
        .collect();
    let system = AntiDetectionSystem::new(
        AntiDetectionConfig::default(),
        default_identities().unwrap(),
        proxies,
        Arc::new(ScriptedProber {
            calls: Mutex::new(HashMap::new()),
        }),
        SharedRng::seeded(11),
        Arc::new(SystemClock),
    )
    .unwrap();

    let first = system.health_check_all_proxies().await;
    assert_eq!(first.checked, 3);
    assert!(first.newly_disabled.is_empty());
    system.health_check_all_proxies().await;
    let third = system.health_check_all_proxies().await;
    assert_eq!(third.newly_disabled, vec!["bad:8080".to_string()]);

    assert_eq!(system.proxy_pool().working_count(), 2);
    for _ in 0..100 {
        let proxy = system.pick_proxy(true).await.unwrap();
        assert_ne!(proxy.host, "bad");
    }
    assert!(system.pick_proxy(false).await.is_none());

    let metrics = system.metrics_snapshot();
    assert_eq!(metrics.total_proxies, 3);
    assert_eq!(metrics.working_proxies, 2);
}

/// 每次都以代理错误失败，记录每次尝试分到的代理
struct ProxyRefusingExecutor {
    seen: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl ScrapeExecutor for ProxyRefusingExecutor {
    async fn execute(&self, request: &ScrapeRequest) -> Result<ScrapeReport, ScrapeFailure> {
        self.seen
            .lock()
            .push(request.anti_detection.proxy.as_ref().map(|p| p.id()));
        Err(ScrapeFailure::new(FailureCause::Proxy, "407 proxy authentication required"))
    }

    fn name(&self) -> &'static str {
        "proxy_refusing"
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_retry_after_proxy_failure_uses_another_proxy() {
    let proxies = (1..=3)
        .map(|i| ProxyEndpoint::try_new(format!("10.0.0.{}", i), 3128, ProxyProtocol::Http).unwrap())
        .collect();
    let executor = Arc::new(ProxyRefusingExecutor {
        seen: Mutex::new(Vec::new()),
    });
    let scheduler = builder(vec![proxied_tier("alpha", &["paris"], 1)], fast_config(2, 1, 2))
        .with_proxies(proxies)
        .with_executor(executor.clone())
        .build()
        .unwrap();

    scheduler.schedule_tier_now("alpha").unwrap();
    scheduler.start().await.unwrap();
    assert!(scheduler.wait_until_drained(Duration::from_secs(10)).await);
    scheduler.stop().await.unwrap();

    let seen: Vec<String> = executor.seen.lock().iter().map(|p| p.clone().unwrap()).collect();
    assert_eq!(seen.len(), 3);
    for pair in seen.windows(2) {
        assert_ne!(pair[0], pair[1]);
    }

    let task = &scheduler.completed_tasks()[0];
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempts, 3);

    let pool = scheduler.core().anti_detection().proxy_pool().snapshot();
    for entry in pool.iter().filter(|e| seen.contains(&e.endpoint.id())) {
        assert!(entry.health.success_rate < 1.0);
    }
}

#[tokio::test]
async fn test_single_proxy_is_reused_until_disabled() {
    let system = AntiDetectionSystem::new(
        AntiDetectionConfig::default(),
        default_identities().unwrap(),
        vec![ProxyEndpoint::try_new("solo", 8080, ProxyProtocol::Http).unwrap()],
        Arc::new(ScriptedProber {
            calls: Mutex::new(HashMap::new()),
        }),
        SharedRng::seeded(3),
        Arc::new(SystemClock),
    )
    .unwrap();

    for _ in 0..2 {
        let proxy = system.acquire_proxy(true).await.unwrap();
        assert_eq!(proxy.id(), "solo:8080");
        system.record_proxy_failure(&proxy.id(), "connection reset");
    }
    assert_eq!(system.acquire_proxy(true).await.unwrap().id(), "solo:8080");
    system.record_proxy_failure("solo:8080", "connection reset");

    assert_eq!(system.proxy_pool().working_count(), 0);
    // 巡检探测成功后重新启用
    assert_eq!(system.acquire_proxy(true).await.unwrap().id(), "solo:8080");
    assert_eq!(system.proxy_pool().working_count(), 1);
}
