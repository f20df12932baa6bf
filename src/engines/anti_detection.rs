// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::models::metrics::AntiDetectionMetrics;
use crate::domain::models::profile::{
    normalize_weights, DelayKind, IdentityProfile, NavigationPattern, ProxyEndpoint,
};
use crate::domain::models::task::{AntiDetectionBundle, DelayPlan};
use crate::domain::models::DomainError;
use crate::engines::health_monitor::{HealthCheckConfig, ProxyHealthMonitor};
use crate::engines::proxy_pool::{HealthSweepSummary, ProxyPool, ProxySelection};
use crate::engines::traits::ProxyProber;
use crate::utils::clock::Clock;
use crate::utils::random::SharedRng;

/// 各类人类行为延迟的取值范围（秒）
#[derive(Debug, Clone)]
pub struct DelayRanges {
    pub page_load: (f64, f64),
    pub between_clicks: (f64, f64),
    pub scroll_pause: (f64, f64),
    pub category_switch: (f64, f64),
    pub retailer_switch: (f64, f64),
    pub session_break: (f64, f64),
}

impl Default for DelayRanges {
    fn default() -> Self {
        Self {
            page_load: (2.0, 8.0),
            between_clicks: (0.5, 2.0),
            scroll_pause: (1.0, 3.0),
            category_switch: (3.0, 10.0),
            retailer_switch: (30.0, 120.0),
            session_break: (300.0, 900.0),
        }
    }
}

impl DelayRanges {
    pub fn range(&self, kind: DelayKind) -> (f64, f64) {
        match kind {
            DelayKind::PageLoad => self.page_load,
            DelayKind::BetweenClicks => self.between_clicks,
            DelayKind::ScrollPause => self.scroll_pause,
            DelayKind::CategorySwitch => self.category_switch,
            DelayKind::RetailerSwitch => self.retailer_switch,
            DelayKind::SessionBreak => self.session_break,
        }
    }
}

/// 反检测配置
#[derive(Debug, Clone)]
pub struct AntiDetectionConfig {
    pub delays: DelayRanges,
    /// 落在区间低段的概率
    pub lower_band_probability: f64,
    /// 低段占整个区间的比例
    pub lower_band_fraction: f64,
    pub identity_rotation_requests: (u32, u32),
    pub identity_rotation_interval: (Duration, Duration),
    pub proxy_rotation_requests: (u32, u32),
    pub proxy_rotation_interval: (Duration, Duration),
    /// 顺序浏览时插入一次回退的概率
    pub backtrack_probability: f64,
    pub cache_control_probability: f64,
    pub health: HealthCheckConfig,
    pub selection: ProxySelection,
}

impl Default for AntiDetectionConfig {
    fn default() -> Self {
        Self {
            delays: DelayRanges::default(),
            lower_band_probability: 0.8,
            lower_band_fraction: 0.6,
            identity_rotation_requests: (20, 40),
            identity_rotation_interval: (Duration::from_secs(1800), Duration::from_secs(3600)),
            proxy_rotation_requests: (5, 10),
            proxy_rotation_interval: (Duration::from_secs(600), Duration::from_secs(1200)),
            backtrack_probability: 0.3,
            cache_control_probability: 0.3,
            health: HealthCheckConfig::default(),
            selection: ProxySelection::default(),
        }
    }
}

#[derive(Debug)]
struct RotationState {
    identity_requests: u32,
    identity_rotated_at: DateTime<Utc>,
    force_identity: bool,
    current_identity: Option<usize>,
    proxy_requests: u32,
    proxy_rotated_at: DateTime<Utc>,
    force_proxy: bool,
    current_proxy: Option<String>,
    /// 最近一次抓取失败的代理，下次选择时避开
    failed_proxy: Option<String>,
    fingerprint: String,
}

#[derive(Debug, Default)]
struct Counters {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    blocked_requests: AtomicU64,
    captcha_encounters: AtomicU64,
    proxy_rotations: AtomicU64,
    identity_rotations: AtomicU64,
    pattern_breaks: AtomicU64,
    human_delays: AtomicU64,
}

/// 反检测系统
///
/// 提供浏览器身份、代理、人类行为延迟和翻页顺序，并统计这些手段的效果。
/// 统计值只用于观测，不会反过来影响调度决策。
pub struct AntiDetectionSystem {
    config: AntiDetectionConfig,
    identities: Mutex<Vec<IdentityProfile>>,
    proxies: ProxyPool,
    rotation: Mutex<RotationState>,
    counters: Counters,
    rng: SharedRng,
    clock: Arc<dyn Clock>,
}

impl AntiDetectionSystem {
    /// 创建反检测系统
    ///
    /// # 参数
    ///
    /// * `config` - 反检测配置
    /// * `identities` - 浏览器身份，权重会被归一化
    /// * `proxies` - 代理列表，可以为空
    /// * `prober` - 代理探测器
    /// * `rng` - 共享随机源
    /// * `clock` - 时钟
    ///
    /// # 返回值
    ///
    /// * `Ok(AntiDetectionSystem)` - 创建成功
    /// * `Err(DomainError)` - 身份列表为空或权重非法
    pub fn new(
        config: AntiDetectionConfig,
        mut identities: Vec<IdentityProfile>,
        proxies: Vec<ProxyEndpoint>,
        prober: Arc<dyn ProxyProber>,
        rng: SharedRng,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DomainError> {
        normalize_weights(&mut identities)?;

        let monitor = ProxyHealthMonitor::new(prober, config.health.clone());
        let pool = ProxyPool::new(proxies, monitor, config.selection.clone(), clock.clone());
        let now = clock.now();
        let fingerprint = Self::fingerprint(now, &rng);

        Ok(Self {
            config,
            identities: Mutex::new(identities),
            proxies: pool,
            rotation: Mutex::new(RotationState {
                identity_requests: 0,
                identity_rotated_at: now,
                force_identity: false,
                current_identity: None,
                proxy_requests: 0,
                proxy_rotated_at: now,
                force_proxy: false,
                current_proxy: None,
                failed_proxy: None,
                fingerprint,
            }),
            counters: Counters::default(),
            rng,
            clock,
        })
    }

    pub fn config(&self) -> &AntiDetectionConfig {
        &self.config
    }

    pub fn proxy_pool(&self) -> &ProxyPool {
        &self.proxies
    }

    pub fn identities(&self) -> Vec<IdentityProfile> {
        self.identities.lock().clone()
    }

    fn fingerprint(now: DateTime<Utc>, rng: &SharedRng) -> String {
        let mut hasher = Sha256::new();
        hasher.update(now.to_rfc3339().as_bytes());
        hasher.update(rng.uuid().as_bytes());
        let digest = hex::encode(hasher.finalize());
        digest[..16].to_string()
    }

    fn draw_identity_index(&self, identities: &[IdentityProfile]) -> usize {
        let r = self.rng.unit();
        let mut cumulative = 0.0;
        for (idx, profile) in identities.iter().enumerate() {
            cumulative += profile.weight;
            if r < cumulative {
                return idx;
            }
        }
        identities.len().saturating_sub(1)
    }

    /// 按归一化权重随机抽取一个浏览器身份
    pub fn pick_identity(&self) -> IdentityProfile {
        let now = self.clock.now();
        let mut identities = self.identities.lock();
        let idx = self.draw_identity_index(&identities);
        identities[idx].last_used = Some(now);
        identities[idx].clone()
    }

    /// 会话内沿用的身份，达到轮换条件时重新抽取
    pub fn session_identity(&self) -> IdentityProfile {
        let rotate = self.should_rotate_identity();
        let now = self.clock.now();
        let mut identities = self.identities.lock();
        let mut rotation = self.rotation.lock();

        let idx = match rotation.current_identity {
            Some(idx) if !rotate && idx < identities.len() => idx,
            previous => {
                let idx = self.draw_identity_index(&identities);
                rotation.current_identity = Some(idx);
                rotation.identity_requests = 0;
                rotation.identity_rotated_at = now;
                rotation.force_identity = false;
                if previous.is_some() {
                    self.counters.identity_rotations.fetch_add(1, Ordering::Relaxed);
                    counter!("anti_detection_rotations_total", "resource" => "identity").increment(1);
                    debug!("Rotated session identity to {}", identities[idx].browser);
                }
                idx
            }
        };

        identities[idx].last_used = Some(now);
        identities[idx].clone()
    }

    /// 选择一个代理
    ///
    /// 层级未启用代理轮换或没有配置代理时返回 `None`（直连）。
    pub async fn pick_proxy(&self, rotation_enabled: bool) -> Option<ProxyEndpoint> {
        if !rotation_enabled || self.proxies.is_empty() {
            return None;
        }
        self.proxies.pick().await
    }

    /// 获取本次请求使用的代理
    ///
    /// 当前代理仍可用且未达到轮换条件时继续沿用，否则重新选择。
    pub async fn acquire_proxy(&self, rotation_enabled: bool) -> Option<ProxyEndpoint> {
        if !rotation_enabled || self.proxies.is_empty() {
            return None;
        }

        let current = {
            let rotation = self.rotation.lock();
            rotation.current_proxy.clone()
        };
        if let Some(proxy_id) = current {
            if !self.should_rotate_proxy() {
                if let Some(proxy) = self.proxies.touch_if_eligible(&proxy_id) {
                    return Some(proxy);
                }
            }
        }

        let failed = self.rotation.lock().failed_proxy.take();
        let proxy = self.proxies.pick_avoiding(failed.as_deref()).await?;
        let now = self.clock.now();
        let mut rotation = self.rotation.lock();
        if rotation.current_proxy.as_deref() != Some(proxy.id().as_str()) {
            if rotation.current_proxy.is_some() {
                self.counters.proxy_rotations.fetch_add(1, Ordering::Relaxed);
                counter!("anti_detection_rotations_total", "resource" => "proxy").increment(1);
                debug!("Rotated session proxy to {}", proxy);
            }
            rotation.current_proxy = Some(proxy.id());
        }
        rotation.proxy_requests = 0;
        rotation.proxy_rotated_at = now;
        rotation.force_proxy = false;
        Some(proxy)
    }

    /// 记录一次由代理导致的抓取失败
    ///
    /// 失败计入该代理的健康状态；若它是当前会话代理，下次获取时强制轮换并避开它。
    pub fn record_proxy_failure(&self, proxy_id: &str, reason: &str) {
        let disabled = self.proxies.record_failure(proxy_id, reason);
        let mut rotation = self.rotation.lock();
        if rotation.current_proxy.as_deref() == Some(proxy_id) {
            rotation.force_proxy = true;
        }
        rotation.failed_proxy = Some(proxy_id.to_string());
        debug!(
            "Proxy {} failed a scrape{}, rotation forced",
            proxy_id,
            if disabled { " and was disabled" } else { "" }
        );
    }

    /// 抽取一个人类行为延迟
    ///
    /// 80% 的取值落在区间的低 60%，其余落在高 40%。
    pub fn human_delay(&self, kind: DelayKind) -> Duration {
        let (low, high) = self.config.delays.range(kind);
        let split = low + (high - low) * self.config.lower_band_fraction;

        let secs = if self.rng.chance(self.config.lower_band_probability) {
            self.rng.uniform(low, split)
        } else {
            self.rng.uniform(split, high)
        };

        self.counters.human_delays.fetch_add(1, Ordering::Relaxed);
        Duration::from_secs_f64(secs.max(0.0))
    }

    pub fn pick_navigation_pattern(&self) -> NavigationPattern {
        let idx = self.rng.range_u32(0, NavigationPattern::ALL.len() as u32 - 1) as usize;
        NavigationPattern::ALL[idx]
    }

    /// 随机选择导航模式并生成翻页顺序
    pub fn page_visit_order(&self, total_pages: u32, pages_wanted: u32) -> Vec<u32> {
        let pattern = self.pick_navigation_pattern();
        self.page_visit_order_with(pattern, total_pages, pages_wanted)
    }

    /// 按指定导航模式生成 1 起始的翻页顺序，长度不超过 `pages_wanted`
    pub fn page_visit_order_with(
        &self,
        pattern: NavigationPattern,
        total_pages: u32,
        pages_wanted: u32,
    ) -> Vec<u32> {
        if total_pages == 0 || pages_wanted == 0 {
            return Vec::new();
        }
        if pages_wanted >= total_pages {
            return (1..=total_pages).collect();
        }

        let mut order: Vec<u32> = match pattern {
            NavigationPattern::SequentialBrowse => {
                let mut order: Vec<u32> = (1..=pages_wanted).collect();
                if pages_wanted > 2 && self.rng.chance(self.config.backtrack_probability) {
                    let pos = self.rng.range_u32(2, pages_wanted - 1) as usize;
                    let back_to = self.rng.range_u32(1, order[pos - 1].saturating_sub(1).max(1));
                    order.insert(pos, back_to);
                }
                order
            }
            NavigationPattern::RandomJump => {
                let max_page = total_pages.min(pages_wanted.saturating_mul(2));
                let amount = pages_wanted.min(max_page) as usize;
                let mut picked: Vec<u32> = self.rng.with(|rng| {
                    rand::seq::index::sample(rng, max_page as usize, amount)
                        .into_iter()
                        .map(|i| i as u32 + 1)
                        .collect()
                });
                picked.sort_unstable();
                picked
            }
            NavigationPattern::DeepBrowse => (1..=pages_wanted).collect(),
            NavigationPattern::QuickScan => {
                let step = (total_pages / pages_wanted).max(1) as usize;
                (1..=total_pages).step_by(step).collect()
            }
        };

        order.truncate(pages_wanted as usize);
        order
    }

    /// 身份是否达到轮换条件
    pub fn should_rotate_identity(&self) -> bool {
        let (requests, rotated_at, forced) = {
            let rotation = self.rotation.lock();
            (rotation.identity_requests, rotation.identity_rotated_at, rotation.force_identity)
        };
        forced
            || self.threshold_exceeded(
                requests,
                rotated_at,
                self.config.identity_rotation_requests,
                self.config.identity_rotation_interval,
            )
    }

    /// 代理是否达到轮换条件
    pub fn should_rotate_proxy(&self) -> bool {
        let (requests, rotated_at, forced) = {
            let rotation = self.rotation.lock();
            (rotation.proxy_requests, rotation.proxy_rotated_at, rotation.force_proxy)
        };
        forced
            || self.threshold_exceeded(
                requests,
                rotated_at,
                self.config.proxy_rotation_requests,
                self.config.proxy_rotation_interval,
            )
    }

    fn threshold_exceeded(
        &self,
        requests: u32,
        rotated_at: DateTime<Utc>,
        request_range: (u32, u32),
        interval_range: (Duration, Duration),
    ) -> bool {
        let request_threshold = self.rng.range_u32(request_range.0, request_range.1);
        let interval = self.rng.duration_between(interval_range.0, interval_range.1);
        let elapsed = (self.clock.now() - rotated_at).to_std().unwrap_or_default();
        requests >= request_threshold || elapsed >= interval
    }

    /// 为身份生成一组请求头
    pub fn headers_for(&self, identity: &IdentityProfile) -> BTreeMap<String, String> {
        const LANGUAGES: [&str; 3] = [
            "es-CL,es;q=0.9,en;q=0.8",
            "es-CL,es;q=0.8,en-US;q=0.6,en;q=0.4",
            "es;q=0.9,en;q=0.8",
        ];
        const CACHE_CONTROL: [&str; 3] = ["max-age=0", "no-cache", "no-store, no-cache, must-revalidate"];

        let mut headers = BTreeMap::new();
        headers.insert("User-Agent".to_string(), identity.user_agent.clone());
        headers.insert(
            "Accept".to_string(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8".to_string(),
        );
        let language = LANGUAGES[self.rng.range_u32(0, LANGUAGES.len() as u32 - 1) as usize];
        headers.insert("Accept-Language".to_string(), language.to_string());
        headers.insert("Accept-Encoding".to_string(), "gzip, deflate, br".to_string());
        headers.insert("DNT".to_string(), self.rng.range_u32(0, 1).to_string());
        headers.insert("Connection".to_string(), "keep-alive".to_string());
        headers.insert("Upgrade-Insecure-Requests".to_string(), "1".to_string());

        if identity.is_chromium() {
            let version = chrome_major_version(&identity.user_agent).unwrap_or("122");
            headers.insert(
                "sec-ch-ua".to_string(),
                format!(
                    "\"Chromium\";v=\"{v}\", \"Not(A:Brand\";v=\"24\", \"Google Chrome\";v=\"{v}\"",
                    v = version
                ),
            );
            headers.insert("sec-ch-ua-mobile".to_string(), "?0".to_string());
            headers.insert("sec-ch-ua-platform".to_string(), format!("\"{}\"", identity.os));
            headers.insert("Sec-Fetch-Dest".to_string(), "document".to_string());
            headers.insert("Sec-Fetch-Mode".to_string(), "navigate".to_string());
            headers.insert("Sec-Fetch-Site".to_string(), "none".to_string());
            headers.insert("Sec-Fetch-User".to_string(), "?1".to_string());
        }

        if self.rng.chance(self.config.cache_control_probability) {
            let value = CACHE_CONTROL[self.rng.range_u32(0, CACHE_CONTROL.len() as u32 - 1) as usize];
            headers.insert("Cache-Control".to_string(), value.to_string());
        }

        headers
    }

    /// 组装交给抓取回调的反检测配置包，代理在执行时才分配
    pub fn prepare_bundle(
        &self,
        identity: IdentityProfile,
        assumed_total_pages: u32,
        pages_wanted: u32,
    ) -> AntiDetectionBundle {
        let navigation = self.pick_navigation_pattern();
        let page_order = self.page_visit_order_with(navigation, assumed_total_pages, pages_wanted);
        let headers = self.headers_for(&identity);
        let delays = DelayPlan {
            page_load_secs: self.human_delay(DelayKind::PageLoad).as_secs_f64(),
            between_pages_secs: self.human_delay(DelayKind::BetweenClicks).as_secs_f64(),
            category_switch_secs: self.human_delay(DelayKind::CategorySwitch).as_secs_f64(),
        };

        AntiDetectionBundle {
            identity,
            headers,
            delays,
            navigation,
            page_order,
            scroll: navigation.scroll_behavior(),
            proxy: None,
        }
    }

    /// 记录一次请求结果
    pub fn record_request(&self, success: bool) {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.counters.successful_requests.fetch_add(1, Ordering::Relaxed);
        }
        let mut rotation = self.rotation.lock();
        rotation.identity_requests = rotation.identity_requests.saturating_add(1);
        rotation.proxy_requests = rotation.proxy_requests.saturating_add(1);
    }

    pub fn record_blocked(&self) {
        self.counters.blocked_requests.fetch_add(1, Ordering::Relaxed);
        counter!("anti_detection_blocked_total").increment(1);
    }

    pub fn record_captcha(&self) {
        self.counters.captcha_encounters.fetch_add(1, Ordering::Relaxed);
        counter!("anti_detection_captcha_total").increment(1);
    }

    pub fn record_pattern_break(&self) {
        self.counters.pattern_breaks.fetch_add(1, Ordering::Relaxed);
    }

    /// 开始一次会话休息
    ///
    /// 重新生成会话指纹，并强制下次使用时轮换身份和代理。
    ///
    /// # 返回值
    ///
    /// 返回调用方应当休眠的时长
    pub fn session_break(&self) -> Duration {
        let pause = self.human_delay(DelayKind::SessionBreak);
        let now = self.clock.now();
        let fingerprint = Self::fingerprint(now, &self.rng);
        {
            let mut rotation = self.rotation.lock();
            rotation.force_identity = true;
            rotation.force_proxy = true;
            rotation.fingerprint = fingerprint.clone();
        }
        self.record_pattern_break();
        counter!("anti_detection_session_breaks_total").increment(1);
        info!(
            "Session break for {:.0}s, new session fingerprint {}",
            pause.as_secs_f64(),
            fingerprint
        );
        pause
    }

    pub async fn health_check_all_proxies(&self) -> HealthSweepSummary {
        self.proxies.health_check_all().await
    }

    /// 最近一次身份与代理轮换时间
    pub fn last_rotations(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let rotation = self.rotation.lock();
        (rotation.identity_rotated_at, rotation.proxy_rotated_at)
    }

    /// 从持久化状态恢复轮换时间
    pub fn restore_rotations(&self, identity: Option<DateTime<Utc>>, proxy: Option<DateTime<Utc>>) {
        let mut rotation = self.rotation.lock();
        if let Some(at) = identity {
            rotation.identity_rotated_at = at;
        }
        if let Some(at) = proxy {
            rotation.proxy_rotated_at = at;
        }
    }

    /// 反检测指标快照
    pub fn metrics_snapshot(&self) -> AntiDetectionMetrics {
        let total = self.counters.total_requests.load(Ordering::Relaxed);
        let successful = self.counters.successful_requests.load(Ordering::Relaxed);
        let success_rate = if total == 0 {
            1.0
        } else {
            successful as f64 / total as f64
        };

        AntiDetectionMetrics {
            total_requests: total,
            successful_requests: successful,
            blocked_requests: self.counters.blocked_requests.load(Ordering::Relaxed),
            captcha_encounters: self.counters.captcha_encounters.load(Ordering::Relaxed),
            proxy_rotations: self.counters.proxy_rotations.load(Ordering::Relaxed),
            identity_rotations: self.counters.identity_rotations.load(Ordering::Relaxed),
            pattern_breaks: self.counters.pattern_breaks.load(Ordering::Relaxed),
            human_delays_applied: self.counters.human_delays.load(Ordering::Relaxed),
            success_rate,
            working_proxies: self.proxies.working_count(),
            total_proxies: self.proxies.len(),
            identity_profiles: self.identities.lock().len(),
            session_fingerprint: self.rotation.lock().fingerprint.clone(),
        }
    }
}

fn chrome_major_version(user_agent: &str) -> Option<&str> {
    let rest = user_agent.split("Chrome/").nth(1)?;
    rest.split('.').next().filter(|v| !v.is_empty())
}
