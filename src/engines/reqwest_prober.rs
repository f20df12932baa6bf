// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use std::time::{Duration, Instant};

use crate::domain::models::profile::ProxyEndpoint;
use crate::engines::traits::{EngineError, ProxyProber};

/// 基于 Reqwest 的代理探测器
///
/// 通过代理请求一个轻量地址（默认 `http://httpbin.org/ip`），
/// 2xx 视为代理可用。
pub struct ReqwestProber {
    probe_url: String,
}

impl ReqwestProber {
    pub fn new(probe_url: impl Into<String>) -> Self {
        Self {
            probe_url: probe_url.into(),
        }
    }
}

impl Default for ReqwestProber {
    fn default() -> Self {
        Self::new("http://httpbin.org/ip")
    }
}

#[async_trait]
impl ProxyProber for ReqwestProber {
    async fn probe(&self, proxy: &ProxyEndpoint, timeout: Duration) -> Result<Duration, EngineError> {
        let reqwest_proxy = reqwest::Proxy::all(proxy.url())
            .map_err(|e| EngineError::InvalidProxy(format!("{}: {}", proxy, e)))?;

        // Each probe gets a fresh client so pooled connections never bypass the proxy
        let client = reqwest::Client::builder()
            .proxy(reqwest_proxy)
            .timeout(timeout)
            .build()?;

        let start = Instant::now();
        let response = client.get(&self.probe_url).send().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::Timeout
            } else {
                EngineError::RequestFailed(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::UnexpectedStatus(status.as_u16()));
        }

        Ok(start.elapsed())
    }

    fn name(&self) -> &'static str {
        "reqwest"
    }
}
