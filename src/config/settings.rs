// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use validator::{Validate, ValidationErrors};

use crate::config::catalog;
use crate::domain::models::profile::{IdentityProfile, ProxyEndpoint, ProxyProtocol};
use crate::domain::models::tier::{Target, Tier, TierSpec};
use crate::domain::models::DomainError;
use crate::domain::services::tier_manager::SchedulingTunables;
use crate::engines::anti_detection::{AntiDetectionConfig, DelayRanges};
use crate::engines::health_monitor::HealthCheckConfig;
use crate::engines::proxy_pool::ProxySelection;
use crate::queue::scheduler::SchedulerConfig;
use crate::utils::retry_policy::RetryPolicy;

/// 配置错误类型
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("配置加载失败: {0}")]
    Load(#[from] ConfigError),

    #[error("配置校验失败: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("配置无效: {0}")]
    Invalid(#[from] DomainError),
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// 应用程序配置设置
///
/// 包含调度、反检测、调优常量、存储、日志以及层级/代理/身份列表
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Settings {
    /// 调度器配置
    #[validate(nested)]
    pub scheduler: SchedulerSettings,
    /// 反检测配置
    #[validate(nested)]
    pub anti_detection: AntiDetectionSettings,
    /// 调优常量
    #[validate(nested)]
    pub tuning: TuningSettings,
    /// 存储配置
    pub storage: StorageSettings,
    /// 日志与指标配置
    pub telemetry: TelemetrySettings,
    /// 层级定义，为空时使用内置目录
    #[serde(default)]
    #[validate(nested)]
    pub tiers: Vec<TierSettings>,
    /// 代理列表
    #[serde(default)]
    #[validate(nested)]
    pub proxies: Vec<ProxySettings>,
    /// 浏览器身份，为空时使用内置目录
    #[serde(default)]
    #[validate(nested)]
    pub identities: Vec<IdentitySettings>,
}

/// 调度器配置设置
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SchedulerSettings {
    /// 全局最大并发任务数
    #[validate(range(min = 1, max = 256))]
    pub max_concurrent_global: usize,
    /// 单个零售商最大并发任务数
    #[validate(range(min = 1, max = 64))]
    pub max_concurrent_per_target: usize,
    /// 每个任务的重试次数
    #[validate(range(max = 20))]
    pub max_retries: u32,
    /// 重试退避下限（秒）
    pub retry_min_backoff_secs: u64,
    /// 重试退避上限（秒）
    pub retry_max_backoff_secs: u64,
    /// 派发循环空闲时的轮询间隔（毫秒）
    #[validate(range(min = 1))]
    pub dispatch_interval_ms: u64,
    /// 没有到期层级时的最长等待（秒）
    #[validate(range(min = 1))]
    pub idle_sleep_cap_secs: u64,
    /// 健康检查间隔（秒）
    #[validate(range(min = 1))]
    pub health_check_interval_secs: u64,
    /// 指标写入间隔（秒）
    #[validate(range(min = 1))]
    pub metrics_interval_secs: u64,
    /// 维护窗口所在的小时
    #[validate(range(max = 23))]
    pub maintenance_hour: u32,
    /// 维护窗口时长（分钟）
    #[validate(range(min = 1, max = 60))]
    pub maintenance_window_minutes: u32,
    /// 维护时区相对 UTC 的分钟偏移
    pub maintenance_utc_offset_minutes: i32,
    /// 每小时触发会话休息的概率
    #[validate(range(min = 0.0, max = 1.0))]
    pub session_break_probability_per_hour: f64,
    /// 单个抓取回调的超时（秒），0 表示不限制
    pub task_timeout_secs: u64,
    /// 已完成任务历史上限
    #[validate(range(min = 1))]
    pub history_cap: usize,
    /// 超出上限后裁剪到的数量
    pub history_trim_to: usize,
    /// 已完成任务的保留时长（小时）
    #[validate(range(min = 1))]
    pub history_retention_hours: u64,
    /// 停止后台循环的等待上限（秒）
    pub worker_shutdown_timeout_secs: u64,
    /// 等待运行中任务结束的上限（秒）
    pub drain_timeout_secs: u64,
    /// 成功率告警阈值
    #[validate(range(min = 0.0, max = 1.0))]
    pub success_rate_alert: f64,
    /// 队列长度告警阈值
    pub queue_alert: usize,
    /// 假定的品类总页数
    #[validate(range(min = 1))]
    pub assumed_total_pages: u32,
    /// 随机种子，未设置时使用系统熵
    pub seed: Option<u64>,
}

/// 反检测配置设置
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AntiDetectionSettings {
    /// 身份轮换请求数下限
    #[validate(range(min = 1))]
    pub identity_rotation_min_requests: u32,
    /// 身份轮换请求数上限
    pub identity_rotation_max_requests: u32,
    /// 身份轮换时间下限（分钟）
    #[validate(range(min = 1))]
    pub identity_rotation_min_minutes: u64,
    /// 身份轮换时间上限（分钟）
    pub identity_rotation_max_minutes: u64,
    /// 代理轮换请求数下限
    #[validate(range(min = 1))]
    pub proxy_rotation_min_requests: u32,
    /// 代理轮换请求数上限
    pub proxy_rotation_max_requests: u32,
    /// 代理轮换时间下限（分钟）
    #[validate(range(min = 1))]
    pub proxy_rotation_min_minutes: u64,
    /// 代理轮换时间上限（分钟）
    pub proxy_rotation_max_minutes: u64,
    /// 健康探测地址
    #[validate(url)]
    pub probe_url: String,
    /// 健康探测超时（秒）
    #[validate(range(min = 1, max = 120))]
    pub probe_timeout_secs: u64,
    /// 同时进行的探测数
    #[validate(range(min = 1, max = 64))]
    pub max_parallel_checks: usize,
    /// 判定代理失效的连续失败次数
    #[validate(range(min = 1))]
    pub max_consecutive_failures: u32,
    /// 落在区间低段的概率
    #[validate(range(min = 0.0, max = 1.0))]
    pub lower_band_probability: f64,
    /// 低段占区间的比例
    #[validate(range(min = 0.0, max = 1.0))]
    pub lower_band_fraction: f64,
    /// 页面加载延迟（秒）
    pub page_load_delay: (f64, f64),
    /// 点击间隔（秒）
    pub between_clicks_delay: (f64, f64),
    /// 滚动停顿（秒）
    pub scroll_pause_delay: (f64, f64),
    /// 切换品类延迟（秒）
    pub category_switch_delay: (f64, f64),
    /// 切换零售商延迟（秒）
    pub retailer_switch_delay: (f64, f64),
    /// 会话休息（秒）
    pub session_break_delay: (f64, f64),
}

/// 调优常量设置
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TuningSettings {
    #[validate(range(min = 0.0, max = 1.0))]
    pub success_smoothing: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub failure_decay: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub duration_smoothing: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub alternate_tier_probability: f64,
    #[validate(range(min = 1))]
    pub schedule_gap_min_secs: u64,
    pub schedule_gap_max_secs: u64,
    #[validate(range(min = 1))]
    pub pattern_break_min_batches: u32,
    pub pattern_break_max_batches: u32,
    pub pattern_break_min_pause_secs: u64,
    pub pattern_break_max_pause_secs: u64,
    #[validate(range(min = 1))]
    pub tier_history_limit: usize,
}

/// 存储配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// 调度状态文件
    pub state_path: PathBuf,
    /// 指标快照文件
    pub metrics_path: PathBuf,
}

/// 日志与指标配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySettings {
    /// 日志格式
    #[serde(default)]
    pub log_format: LogFormat,
    /// Prometheus 监听地址，例如 `0.0.0.0:9000`
    pub metrics_listen: Option<String>,
}

/// 层级配置
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TierSettings {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(range(min = 0.01))]
    pub frequency_hours: f64,
    #[validate(range(min = 1))]
    pub pages_min: u32,
    pub pages_max: u32,
    pub priority: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter: f64,
    #[validate(range(min = 1))]
    pub max_concurrent: usize,
    #[serde(default)]
    pub proxy_rotation: bool,
    #[serde(default)]
    pub stealth_mode: bool,
    #[validate(length(min = 1), nested)]
    pub targets: Vec<TargetSettings>,
}

/// 层级下的抓取目标
#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct TargetSettings {
    #[validate(length(min = 1))]
    pub retailer: String,
    #[validate(length(min = 1))]
    pub category: String,
    #[validate(url)]
    pub url: String,
    pub priority: f64,
}

/// 代理配置
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ProxySettings {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    #[serde(default)]
    pub protocol: ProxyProtocol,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// 浏览器身份配置
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct IdentitySettings {
    #[validate(length(min = 1))]
    pub user_agent: String,
    pub browser: String,
    pub os: String,
    pub weight: f64,
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

fn minutes(value: u64) -> Duration {
    Duration::from_secs(value * 60)
}

fn ordered<T: PartialOrd + std::fmt::Debug>(name: &str, low: T, high: T) -> Result<(T, T), DomainError> {
    if low > high {
        return Err(DomainError::ValidationError(format!(
            "{} range ({:?}, {:?}) is inverted",
            name, low, high
        )));
    }
    Ok((low, high))
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 依次叠加内置默认值、`config/default`、`config/{APP_ENVIRONMENT}`
    /// 以及 `PRICETIER__` 前缀的环境变量
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - 成功加载并校验的配置
    /// * `Err(SettingsError)` - 配置加载或校验失败
    pub fn new() -> Result<Self, SettingsError> {
        let env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        let builder = Self::defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(Environment::with_prefix("PRICETIER").separator("__"));

        Self::finish(builder)
    }

    /// 从指定文件加载配置（叠加在内置默认值之上）
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let builder = Self::defaults()?.add_source(File::from(path.as_ref()).required(true));
        Self::finish(builder)
    }

    /// 仅使用内置默认值
    pub fn with_defaults() -> Result<Self, SettingsError> {
        Self::finish(Self::defaults()?)
    }

    fn finish(builder: ConfigBuilder<DefaultState>) -> Result<Self, SettingsError> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            // Scheduler
            .set_default("scheduler.max_concurrent_global", 3)?
            .set_default("scheduler.max_concurrent_per_target", 1)?
            .set_default("scheduler.max_retries", 3)?
            .set_default("scheduler.retry_min_backoff_secs", 300)?
            .set_default("scheduler.retry_max_backoff_secs", 900)?
            .set_default("scheduler.dispatch_interval_ms", 1000)?
            .set_default("scheduler.idle_sleep_cap_secs", 300)?
            .set_default("scheduler.health_check_interval_secs", 15 * 60)?
            .set_default("scheduler.metrics_interval_secs", 10 * 60)?
            .set_default("scheduler.maintenance_hour", 4)?
            .set_default("scheduler.maintenance_window_minutes", 30)?
            .set_default("scheduler.maintenance_utc_offset_minutes", -180)?
            .set_default("scheduler.session_break_probability_per_hour", 0.05)?
            .set_default("scheduler.task_timeout_secs", 30 * 60)?
            .set_default("scheduler.history_cap", 200)?
            .set_default("scheduler.history_trim_to", 150)?
            .set_default("scheduler.history_retention_hours", 24)?
            .set_default("scheduler.worker_shutdown_timeout_secs", 30)?
            .set_default("scheduler.drain_timeout_secs", 300)?
            .set_default("scheduler.success_rate_alert", 0.8)?
            .set_default("scheduler.queue_alert", 50)?
            .set_default("scheduler.assumed_total_pages", 10)?
            // Anti-detection
            .set_default("anti_detection.identity_rotation_min_requests", 20)?
            .set_default("anti_detection.identity_rotation_max_requests", 40)?
            .set_default("anti_detection.identity_rotation_min_minutes", 30)?
            .set_default("anti_detection.identity_rotation_max_minutes", 60)?
            .set_default("anti_detection.proxy_rotation_min_requests", 5)?
            .set_default("anti_detection.proxy_rotation_max_requests", 10)?
            .set_default("anti_detection.proxy_rotation_min_minutes", 10)?
            .set_default("anti_detection.proxy_rotation_max_minutes", 20)?
            .set_default("anti_detection.probe_url", "http://httpbin.org/ip")?
            .set_default("anti_detection.probe_timeout_secs", 10)?
            .set_default("anti_detection.max_parallel_checks", 5)?
            .set_default("anti_detection.max_consecutive_failures", 3)?
            .set_default("anti_detection.lower_band_probability", 0.8)?
            .set_default("anti_detection.lower_band_fraction", 0.6)?
            .set_default("anti_detection.page_load_delay", vec![2.0, 8.0])?
            .set_default("anti_detection.between_clicks_delay", vec![0.5, 2.0])?
            .set_default("anti_detection.scroll_pause_delay", vec![1.0, 3.0])?
            .set_default("anti_detection.category_switch_delay", vec![3.0, 10.0])?
            .set_default("anti_detection.retailer_switch_delay", vec![30.0, 120.0])?
            .set_default("anti_detection.session_break_delay", vec![300.0, 900.0])?
            // Tuning
            .set_default("tuning.success_smoothing", 0.05)?
            .set_default("tuning.failure_decay", 0.9)?
            .set_default("tuning.duration_smoothing", 0.2)?
            .set_default("tuning.alternate_tier_probability", 0.15)?
            .set_default("tuning.schedule_gap_min_secs", 30)?
            .set_default("tuning.schedule_gap_max_secs", 300)?
            .set_default("tuning.pattern_break_min_batches", 5)?
            .set_default("tuning.pattern_break_max_batches", 7)?
            .set_default("tuning.pattern_break_min_pause_secs", 300)?
            .set_default("tuning.pattern_break_max_pause_secs", 900)?
            .set_default("tuning.tier_history_limit", 50)?
            // Storage
            .set_default("storage.state_path", "data/tier_scheduler_state.json")?
            .set_default("storage.metrics_path", "data/scheduler_metrics.json")?
            // Telemetry
            .set_default("telemetry.log_format", "pretty")
    }

    /// 转换为调度器配置
    pub fn scheduler_config(&self) -> Result<SchedulerConfig, SettingsError> {
        let s = &self.scheduler;
        let (min_backoff, max_backoff) =
            ordered("retry backoff", s.retry_min_backoff_secs, s.retry_max_backoff_secs)?;
        if s.history_trim_to > s.history_cap {
            return Err(DomainError::ValidationError(format!(
                "history_trim_to {} exceeds history_cap {}",
                s.history_trim_to, s.history_cap
            ))
            .into());
        }
        if !(-720..=840).contains(&s.maintenance_utc_offset_minutes) {
            return Err(DomainError::ValidationError(format!(
                "maintenance_utc_offset_minutes {} is out of range",
                s.maintenance_utc_offset_minutes
            ))
            .into());
        }
        if s.max_concurrent_per_target > s.max_concurrent_global {
            return Err(DomainError::ValidationError(format!(
                "max_concurrent_per_target {} exceeds max_concurrent_global {}",
                s.max_concurrent_per_target, s.max_concurrent_global
            ))
            .into());
        }

        Ok(SchedulerConfig {
            max_concurrent_global: s.max_concurrent_global,
            max_concurrent_per_target: s.max_concurrent_per_target,
            retry: RetryPolicy {
                max_retries: s.max_retries,
                min_backoff: secs(min_backoff),
                max_backoff: secs(max_backoff),
            },
            dispatch_interval: Duration::from_millis(s.dispatch_interval_ms),
            idle_sleep_cap: secs(s.idle_sleep_cap_secs),
            health_check_interval: secs(s.health_check_interval_secs),
            metrics_interval: secs(s.metrics_interval_secs),
            maintenance_hour: s.maintenance_hour,
            maintenance_window: minutes(u64::from(s.maintenance_window_minutes)),
            maintenance_utc_offset_minutes: s.maintenance_utc_offset_minutes,
            session_break_probability_per_hour: s.session_break_probability_per_hour,
            task_timeout: (s.task_timeout_secs > 0).then(|| secs(s.task_timeout_secs)),
            history_cap: s.history_cap,
            history_trim_to: s.history_trim_to,
            history_retention: chrono::Duration::hours(s.history_retention_hours as i64),
            worker_shutdown_timeout: secs(s.worker_shutdown_timeout_secs),
            drain_timeout: secs(s.drain_timeout_secs),
            success_rate_alert: s.success_rate_alert,
            queue_alert: s.queue_alert,
            assumed_total_pages: s.assumed_total_pages,
            ..SchedulerConfig::default()
        })
    }

    /// 转换为反检测配置
    pub fn anti_detection_config(&self) -> Result<AntiDetectionConfig, SettingsError> {
        let a = &self.anti_detection;
        let delay = |name: &str, (low, high): (f64, f64)| -> Result<(f64, f64), DomainError> {
            if low < 0.0 {
                return Err(DomainError::ValidationError(format!(
                    "{} delay must not be negative",
                    name
                )));
            }
            ordered(name, low, high)
        };

        let identity_requests = ordered(
            "identity rotation requests",
            a.identity_rotation_min_requests,
            a.identity_rotation_max_requests,
        )?;
        let identity_minutes = ordered(
            "identity rotation minutes",
            a.identity_rotation_min_minutes,
            a.identity_rotation_max_minutes,
        )?;
        let proxy_requests = ordered(
            "proxy rotation requests",
            a.proxy_rotation_min_requests,
            a.proxy_rotation_max_requests,
        )?;
        let proxy_minutes = ordered(
            "proxy rotation minutes",
            a.proxy_rotation_min_minutes,
            a.proxy_rotation_max_minutes,
        )?;

        let defaults = AntiDetectionConfig::default();
        Ok(AntiDetectionConfig {
            delays: DelayRanges {
                page_load: delay("page_load", a.page_load_delay)?,
                between_clicks: delay("between_clicks", a.between_clicks_delay)?,
                scroll_pause: delay("scroll_pause", a.scroll_pause_delay)?,
                category_switch: delay("category_switch", a.category_switch_delay)?,
                retailer_switch: delay("retailer_switch", a.retailer_switch_delay)?,
                session_break: delay("session_break", a.session_break_delay)?,
            },
            lower_band_probability: a.lower_band_probability,
            lower_band_fraction: a.lower_band_fraction,
            identity_rotation_requests: identity_requests,
            identity_rotation_interval: (minutes(identity_minutes.0), minutes(identity_minutes.1)),
            proxy_rotation_requests: proxy_requests,
            proxy_rotation_interval: (minutes(proxy_minutes.0), minutes(proxy_minutes.1)),
            health: HealthCheckConfig {
                timeout: secs(a.probe_timeout_secs),
                max_consecutive_failures: a.max_consecutive_failures,
                max_parallel_checks: a.max_parallel_checks,
                ..defaults.health
            },
            selection: ProxySelection::default(),
            ..defaults
        })
    }

    /// 转换为调优常量
    pub fn tunables(&self) -> Result<SchedulingTunables, SettingsError> {
        let t = &self.tuning;
        let gap = ordered("schedule gap", t.schedule_gap_min_secs, t.schedule_gap_max_secs)?;
        let every = ordered(
            "pattern break batches",
            t.pattern_break_min_batches,
            t.pattern_break_max_batches,
        )?;
        let pause = ordered(
            "pattern break pause",
            t.pattern_break_min_pause_secs,
            t.pattern_break_max_pause_secs,
        )?;

        let tunables = SchedulingTunables {
            success_smoothing: t.success_smoothing,
            failure_decay: t.failure_decay,
            duration_smoothing: t.duration_smoothing,
            alternate_tier_probability: t.alternate_tier_probability,
            schedule_gap: (secs(gap.0), secs(gap.1)),
            pattern_break_every: every,
            pattern_break_pause: (secs(pause.0), secs(pause.1)),
            history_limit: t.tier_history_limit,
        };
        tunables.validate()?;
        Ok(tunables)
    }

    /// 层级定义，未配置时使用内置目录
    pub fn tiers(&self) -> Result<Vec<Tier>, SettingsError> {
        if self.tiers.is_empty() {
            return Ok(catalog::default_tiers()?);
        }

        self.tiers
            .iter()
            .map(|tier| -> Result<Tier, SettingsError> {
                let targets = tier
                    .targets
                    .iter()
                    .map(|t| Target::try_new(&t.retailer, &t.category, &t.url, t.priority))
                    .collect::<Result<Vec<_>, _>>()?;
                let spec = TierSpec {
                    name: tier.name.clone(),
                    frequency: Duration::from_secs_f64(tier.frequency_hours * 3600.0),
                    pages_range: (tier.pages_min, tier.pages_max),
                    priority: tier.priority,
                    jitter: tier.jitter,
                    max_concurrent: tier.max_concurrent,
                    proxy_rotation: tier.proxy_rotation,
                    stealth_mode: tier.stealth_mode,
                    targets,
                };
                Ok(Tier::try_from(spec)?)
            })
            .collect()
    }

    /// 代理列表
    pub fn proxies(&self) -> Result<Vec<ProxyEndpoint>, SettingsError> {
        self.proxies
            .iter()
            .map(|p| -> Result<ProxyEndpoint, SettingsError> {
                let endpoint = ProxyEndpoint::try_new(&p.host, p.port, p.protocol)?;
                Ok(match (&p.username, &p.password) {
                    (Some(user), Some(pass)) => endpoint.with_credentials(user, pass),
                    _ => endpoint,
                })
            })
            .collect()
    }

    /// 浏览器身份，未配置时使用内置目录
    pub fn identities(&self) -> Result<Vec<IdentityProfile>, SettingsError> {
        if self.identities.is_empty() {
            return Ok(catalog::default_identities()?);
        }
        self.identities
            .iter()
            .map(|i| {
                IdentityProfile::try_new(&i.user_agent, &i.browser, &i.os, i.weight)
                    .map_err(SettingsError::from)
            })
            .collect()
    }
}
