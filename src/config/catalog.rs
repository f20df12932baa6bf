// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 内置目录
//!
//! 配置文件未提供层级或身份时使用的默认数据。

use std::time::Duration;

use crate::domain::models::profile::IdentityProfile;
use crate::domain::models::tier::{Target, Tier, TierSpec};
use crate::domain::models::DomainError;

type CategoryRow = (&'static str, &'static str, &'static str, f64);

const CRITICAL: &[CategoryRow] = &[
    ("falabella", "smartphones", "https://www.falabella.com/falabella-cl/category/cat720161/Smartphones", 0.95),
    ("falabella", "computadores", "https://www.falabella.com/falabella-cl/category/cat40052/Computadores", 0.9),
    ("falabella", "smart_tv", "https://www.falabella.com/falabella-cl/category/cat7190148/Smart-TV", 0.9),
    ("paris", "celulares", "https://www.paris.cl/tecnologia/celulares/", 0.95),
    ("paris", "computadores", "https://www.paris.cl/tecnologia/computadores/", 0.9),
    ("paris", "television", "https://www.paris.cl/tecnologia/television/", 0.9),
    ("ripley", "celulares", "https://simple.ripley.cl/tecno/celulares", 0.95),
    ("ripley", "computacion", "https://simple.ripley.cl/tecno/computacion", 0.9),
    ("ripley", "television", "https://simple.ripley.cl/tecno/television", 0.9),
    ("hites", "celulares", "https://www.hites.com/celulares/smartphones/", 0.9),
    ("hites", "computadores", "https://www.hites.com/computacion/notebooks/", 0.85),
    ("hites", "television", "https://www.hites.com/television/smart-tv/", 0.85),
    ("abcdin", "celulares", "https://www.abc.cl/tecnologia/celulares/smartphones/", 0.9),
    ("abcdin", "computadores", "https://www.abc.cl/tecnologia/computadores/notebooks/", 0.85),
    ("abcdin", "television", "https://www.abc.cl/tecnologia/television/", 0.85),
];

const IMPORTANT: &[CategoryRow] = &[
    ("falabella", "tablets", "https://www.falabella.com/falabella-cl/category/cat7230007/Tablets", 0.7),
    ("falabella", "smartwatch", "https://www.falabella.com/falabella-cl/category/cat4290063/SmartWatch", 0.7),
    ("falabella", "consolas", "https://www.falabella.com/falabella-cl/category/cat202303/Consolas", 0.65),
    ("paris", "tablets", "https://www.paris.cl/tecnologia/tablets/", 0.7),
    ("paris", "smartwatches", "https://www.paris.cl/tecnologia/wearables/smartwatches/", 0.7),
    ("paris", "gaming", "https://www.paris.cl/tecnologia/gaming/", 0.65),
    ("ripley", "tablets", "https://simple.ripley.cl/tecno/tablets", 0.7),
    ("ripley", "smartwatches", "https://simple.ripley.cl/tecno/smartwatches-y-smartbands", 0.7),
    ("ripley", "gaming", "https://simple.ripley.cl/tecno/gaming", 0.65),
    ("hites", "tablets", "https://www.hites.com/celulares/tablets/", 0.65),
    ("abcdin", "tablets", "https://www.abc.cl/tecnologia/tablets/", 0.65),
];

const TRACKING: &[CategoryRow] = &[
    ("falabella", "parlantes", "https://www.falabella.com/falabella-cl/category/cat3171/Parlantes-bluetooth", 0.5),
    ("falabella", "monitores", "https://www.falabella.com/falabella-cl/category/cat2062/Monitores", 0.5),
    ("paris", "audio", "https://www.paris.cl/tecnologia/audio/", 0.5),
    ("paris", "accesorios", "https://www.paris.cl/tecnologia/accesorios-tecnologia/", 0.45),
    ("ripley", "audio", "https://simple.ripley.cl/tecno/audio", 0.5),
    ("ripley", "accesorios", "https://simple.ripley.cl/tecno/accesorios-computacion", 0.45),
];

const IDENTITIES: &[(&str, &str, &str, f64)] = &[
    (
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
        "Chrome",
        "Windows",
        0.35,
    ),
    (
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
        "Chrome",
        "Windows",
        0.25,
    ),
    (
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
        "Chrome",
        "macOS",
        0.15,
    ),
    (
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.3 Safari/605.1.15",
        "Safari",
        "macOS",
        0.10,
    ),
    (
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:124.0) Gecko/20100101 Firefox/124.0",
        "Firefox",
        "Windows",
        0.10,
    ),
    (
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
        "Chrome",
        "Linux",
        0.05,
    ),
];

fn targets(rows: &[CategoryRow]) -> Result<Vec<Target>, DomainError> {
    rows.iter()
        .map(|(retailer, category, url, priority)| Target::try_new(*retailer, *category, *url, *priority))
        .collect()
}

/// 默认的三个层级：critical (2h)、important (6h)、tracking (24h)
pub fn default_tiers() -> Result<Vec<Tier>, DomainError> {
    let specs = vec![
        TierSpec {
            name: "critical".to_string(),
            frequency: Duration::from_secs(2 * 3600),
            pages_range: (2, 4),
            priority: 0.9,
            jitter: 0.10,
            max_concurrent: 3,
            proxy_rotation: true,
            stealth_mode: true,
            targets: targets(CRITICAL)?,
        },
        TierSpec {
            name: "important".to_string(),
            frequency: Duration::from_secs(6 * 3600),
            pages_range: (1, 3),
            priority: 0.7,
            jitter: 0.15,
            max_concurrent: 2,
            proxy_rotation: true,
            stealth_mode: true,
            targets: targets(IMPORTANT)?,
        },
        TierSpec {
            name: "tracking".to_string(),
            frequency: Duration::from_secs(24 * 3600),
            pages_range: (1, 2),
            priority: 0.5,
            jitter: 0.20,
            max_concurrent: 1,
            proxy_rotation: false,
            stealth_mode: false,
            targets: targets(TRACKING)?,
        },
    ];

    specs.into_iter().map(Tier::try_from).collect()
}

/// 默认浏览器身份（未归一化的权重）
pub fn default_identities() -> Result<Vec<IdentityProfile>, DomainError> {
    IDENTITIES
        .iter()
        .map(|(ua, browser, os, weight)| IdentityProfile::try_new(*ua, *browser, *os, *weight))
        .collect()
}
