// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::DomainError;

/// 代理协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    #[default]
    Http,
    Https,
    Socks5,
}

impl fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProxyProtocol::Http => write!(f, "http"),
            ProxyProtocol::Https => write!(f, "https"),
            ProxyProtocol::Socks5 => write!(f, "socks5"),
        }
    }
}

/// 代理端点描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub protocol: ProxyProtocol,
}

impl ProxyEndpoint {
    pub fn try_new(
        host: impl Into<String>,
        port: u16,
        protocol: ProxyProtocol,
    ) -> Result<Self, DomainError> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(DomainError::ValidationError(
                "proxy host must not be empty".to_string(),
            ));
        }
        if port == 0 {
            return Err(DomainError::ValidationError(format!(
                "proxy {} has invalid port 0",
                host
            )));
        }
        Ok(Self {
            host,
            port,
            username: None,
            password: None,
            protocol,
        })
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// 代理的稳定标识 `host:port`
    pub fn id(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 供 HTTP 客户端使用的完整代理地址（含凭据）
    pub fn url(&self) -> String {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!(
                "{}://{}:{}@{}:{}",
                self.protocol, user, pass, self.host, self.port
            ),
            _ => format!("{}://{}:{}", self.protocol, self.host, self.port),
        }
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}

/// 代理健康状态，只在选择代理或健康检查时修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyHealth {
    pub last_used: Option<DateTime<Utc>>,
    pub success_rate: f64,
    pub response_time_ms: Option<f64>,
    pub consecutive_failures: u32,
    pub is_working: bool,
}

impl Default for ProxyHealth {
    fn default() -> Self {
        Self {
            last_used: None,
            success_rate: 1.0,
            response_time_ms: None,
            consecutive_failures: 0,
            is_working: true,
        }
    }
}

/// 浏览器身份配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityProfile {
    pub user_agent: String,
    pub browser: String,
    pub os: String,
    /// 选择权重，归一化后所有身份之和为 1
    pub weight: f64,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

impl IdentityProfile {
    pub fn try_new(
        user_agent: impl Into<String>,
        browser: impl Into<String>,
        os: impl Into<String>,
        weight: f64,
    ) -> Result<Self, DomainError> {
        let user_agent = user_agent.into();
        if user_agent.trim().is_empty() {
            return Err(DomainError::ValidationError(
                "identity user agent must not be empty".to_string(),
            ));
        }
        if !(weight.is_finite() && weight > 0.0) {
            return Err(DomainError::ValidationError(format!(
                "identity weight {} must be > 0",
                weight
            )));
        }
        Ok(Self {
            user_agent,
            browser: browser.into(),
            os: os.into(),
            weight,
            last_used: None,
        })
    }

    /// Chromium 系浏览器会额外发送 `sec-ch-ua` 头
    pub fn is_chromium(&self) -> bool {
        matches!(
            self.browser.to_ascii_lowercase().as_str(),
            "chrome" | "edge" | "chromium"
        )
    }
}

/// 将身份权重归一化为概率分布
pub fn normalize_weights(profiles: &mut [IdentityProfile]) -> Result<(), DomainError> {
    let total: f64 = profiles.iter().map(|p| p.weight).sum();
    if profiles.is_empty() || !(total.is_finite() && total > 0.0) {
        return Err(DomainError::ValidationError(
            "at least one identity profile with positive weight is required".to_string(),
        ));
    }
    for profile in profiles.iter_mut() {
        profile.weight /= total;
    }
    Ok(())
}

/// 人类行为延迟类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayKind {
    PageLoad,
    BetweenClicks,
    ScrollPause,
    CategorySwitch,
    RetailerSwitch,
    SessionBreak,
}

impl fmt::Display for DelayKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            DelayKind::PageLoad => "page_load",
            DelayKind::BetweenClicks => "between_clicks",
            DelayKind::ScrollPause => "scroll_pause",
            DelayKind::CategorySwitch => "category_switch",
            DelayKind::RetailerSwitch => "retailer_switch",
            DelayKind::SessionBreak => "session_break",
        };
        write!(f, "{}", s)
    }
}

/// 导航模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationPattern {
    /// 顺序浏览，偶尔回退
    SequentialBrowse,
    /// 随机跳页
    RandomJump,
    /// 深度顺序浏览
    DeepBrowse,
    /// 稀疏快速扫描
    QuickScan,
}

impl NavigationPattern {
    pub const ALL: [NavigationPattern; 4] = [
        NavigationPattern::SequentialBrowse,
        NavigationPattern::RandomJump,
        NavigationPattern::DeepBrowse,
        NavigationPattern::QuickScan,
    ];

    /// 该模式对应的滚动行为
    pub fn scroll_behavior(&self) -> ScrollBehavior {
        match self {
            NavigationPattern::SequentialBrowse => ScrollBehavior {
                speed: ScrollSpeed::Medium,
                pause_probability: 0.3,
                back_scroll_probability: 0.1,
            },
            NavigationPattern::RandomJump => ScrollBehavior {
                speed: ScrollSpeed::Fast,
                pause_probability: 0.2,
                back_scroll_probability: 0.05,
            },
            NavigationPattern::DeepBrowse => ScrollBehavior {
                speed: ScrollSpeed::Slow,
                pause_probability: 0.5,
                back_scroll_probability: 0.2,
            },
            NavigationPattern::QuickScan => ScrollBehavior {
                speed: ScrollSpeed::Fast,
                pause_probability: 0.1,
                back_scroll_probability: 0.0,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollSpeed {
    Slow,
    Medium,
    Fast,
}

/// 交给抓取器的滚动行为描述
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrollBehavior {
    pub speed: ScrollSpeed,
    pub pause_probability: f64,
    pub back_scroll_probability: f64,
}
