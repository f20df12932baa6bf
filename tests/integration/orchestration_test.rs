// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pricetier::application::usecases::tiered_orchestration::{
    CategoryScrape, OrchestrationOptions, RetailerOrchestrator, RunMode, TieredOrchestration,
};
use pricetier::domain::models::metrics::SchedulerState;
use pricetier::domain::models::task::{FailureCause, ScrapeFailure, TaskStatus};
use pricetier::engines::traits::ScrapeRequest;

use super::helpers::{builder, fast_config, tier};

/// 只支持 paris 和 ripley 的编排器，每页返回两件商品
struct FakeOrchestrator {
    scraped: AtomicUsize,
    persisted: AtomicUsize,
    arbitrage_calls: AtomicUsize,
}

impl FakeOrchestrator {
    fn new() -> Self {
        Self {
            scraped: AtomicUsize::new(0),
            persisted: AtomicUsize::new(0),
            arbitrage_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RetailerOrchestrator for FakeOrchestrator {
    fn supports(&self, retailer: &str) -> bool {
        matches!(retailer, "paris" | "ripley")
    }

    async fn scrape_category(&self, request: &ScrapeRequest) -> Result<CategoryScrape, ScrapeFailure> {
        self.scraped.fetch_add(1, Ordering::SeqCst);
        if request.url.is_empty() {
            return Err(ScrapeFailure::new(FailureCause::Extraction, "empty url"));
        }
        let products = (0..request.pages_to_scrape * 2)
            .map(|i| serde_json::json!({ "sku": format!("{}-{}", request.category, i), "price": 9990 }))
            .collect();
        Ok(CategoryScrape {
            products,
            pages_scraped: request.pages_to_scrape,
        })
    }

    async fn persist_products(
        &self,
        _request: &ScrapeRequest,
        products: &[serde_json::Value],
    ) -> Result<u32, ScrapeFailure> {
        self.persisted.fetch_add(products.len(), Ordering::SeqCst);
        Ok(products.len() as u32)
    }

    async fn detect_arbitrage(&self) -> anyhow::Result<usize> {
        self.arbitrage_calls.fetch_add(1, Ordering::SeqCst);
        Ok(3)
    }
}

fn options() -> OrchestrationOptions {
    OrchestrationOptions {
        apply_human_delays: false,
        arbitrage_every: Some(2),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_cycle_runs_every_tier_once() {
    let orchestrator = Arc::new(FakeOrchestrator::new());
    let orchestration = TieredOrchestration::new(
        builder(
            vec![tier("critical", &["paris", "ripley", "hites"], 3)],
            fast_config(3, 1, 2),
        ),
        orchestrator.clone(),
        options(),
    )
    .unwrap();

    let stats = orchestration
        .run(RunMode::SingleCycle {
            timeout: Duration::from_secs(10),
        })
        .await
        .unwrap();

    assert_eq!(stats.categories_processed, 2);
    assert_eq!(stats.tier_executions["critical"], 2);
    assert_eq!(stats.errors_handled, 1);
    assert_eq!(stats.arbitrage_runs, 1);
    assert_eq!(stats.arbitrage_opportunities, 3);
    assert_eq!(
        stats.products_persisted,
        orchestrator.persisted.load(Ordering::SeqCst) as u64
    );
    assert_eq!(orchestrator.scraped.load(Ordering::SeqCst), 2);

    let scheduler = orchestration.scheduler();
    assert_eq!(scheduler.state(), SchedulerState::Paused);
    let completed = scheduler.completed_tasks();
    assert_eq!(completed.len(), 3);
    let rejected = completed.iter().find(|t| t.retailer == "hites").unwrap();
    assert_eq!(rejected.status, TaskStatus::Failed);
    assert_eq!(rejected.attempts, 1);
    assert_eq!(
        rejected.result.as_ref().and_then(|r| r.failure.as_ref()).map(|f| f.cause),
        Some(FailureCause::Rejected)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_continuous_mode_honours_max_runtime() {
    let orchestrator = Arc::new(FakeOrchestrator::new());
    let orchestration = TieredOrchestration::new(
        builder(vec![tier("bulk", &["paris"], 1)], fast_config(1, 1, 0)),
        orchestrator,
        OrchestrationOptions {
            apply_human_delays: false,
            arbitrage_every: None,
        },
    )
    .unwrap();

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        orchestration.run(RunMode::Continuous {
            max_runtime: Some(Duration::from_millis(100)),
        }),
    )
    .await;

    let stats = result.unwrap().unwrap();
    assert_eq!(stats.arbitrage_runs, 0);
    assert!(!orchestration.scheduler().is_running().await);
}
