//! Backfill Fetcher
//! 件数の不一致を末尾ページの走査で埋める（既知 id は追加しない）

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::catalog::CatalogClient;
use crate::error::SyncError;
use crate::models::{CatalogCredentials, CatalogItem, SellerInventorySnapshot};

/// Newly found items reported back to the caller.
const SAMPLE_SIZE: usize = 5;

#[derive(Debug, Clone)]
pub struct BackfillOutcome {
    pub snapshot: SellerInventorySnapshot,
    pub sample: Vec<CatalogItem>,
    pub added: usize,
    /// Authoritative count from the page-1 probe.
    pub total_items: u64,
    pub is_large_seller: bool,
}

impl BackfillOutcome {
    fn unchanged(cached: &SellerInventorySnapshot, total_items: u64, is_large_seller: bool) -> Self {
        Self {
            snapshot: cached.clone(),
            sample: Vec::new(),
            added: 0,
            total_items,
            is_large_seller,
        }
    }
}

pub struct BackfillFetcher {
    client: Arc<CatalogClient>,
    lookback_pages: u32,
}

impl BackfillFetcher {
    pub fn new(client: Arc<CatalogClient>, lookback_pages: u32) -> Self {
        Self {
            client,
            lookback_pages,
        }
    }

    pub async fn reconcile(
        &self,
        seller_name: &str,
        creds: &CatalogCredentials,
        cached: &SellerInventorySnapshot,
    ) -> Result<BackfillOutcome, SyncError> {
        let paging = *self.client.paging();
        let probe = self
            .client
            .fetch_seller_page(seller_name, 1, paging.page_size, None, creds)
            .await?;
        let total_items = probe.pagination.items;
        let last_page = probe.pagination.pages.max(1);

        if paging.is_unobservable(probe.pagination.pages) {
            info!("Backfill skipped for {}: {} pages exceed the ceiling", seller_name, last_page);
            return Ok(BackfillOutcome::unchanged(cached, total_items, true));
        }

        let cached_count = cached.items.len() as u64;
        if total_items <= cached_count {
            debug!("Backfill not needed for {} ({} cached, {} upstream)", seller_name, cached_count, total_items);
            return Ok(BackfillOutcome::unchanged(cached, total_items, false));
        }

        let gap = (total_items - cached_count) as usize;
        let first_page = last_page.saturating_sub(self.lookback_pages).max(1);
        let last_page = last_page.min(paging.last_walkable_page());
        info!(
            "🔄 Backfilling {}: {} missing, walking pages {}..={}",
            seller_name, gap, first_page, last_page
        );

        let mut known: HashSet<String> = cached.items.iter().map(|i| i.id.clone()).collect();
        let mut found = Vec::new();
        let mut probe_items = probe.items;

        for page in first_page..=last_page {
            let page_items = if page == 1 {
                std::mem::take(&mut probe_items)
            } else {
                self.client.pause().await;
                self.client
                    .fetch_seller_page(seller_name, page, paging.page_size, None, creds)
                    .await?
                    .items
            };

            for item in page_items {
                if known.insert(item.id.clone()) {
                    found.push(item);
                }
            }
            if found.len() >= gap {
                break;
            }
        }

        let sample = found.iter().take(SAMPLE_SIZE).cloned().collect();
        let added = found.len();
        let mut items = cached.items.clone();
        items.extend(found);

        info!("Backfill for {} added {} items", seller_name, added);
        Ok(BackfillOutcome {
            snapshot: SellerInventorySnapshot {
                seller_name: seller_name.to_string(),
                items,
            },
            sample,
            added,
            total_items,
            is_large_seller: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PagingPolicy;
    use crate::rate_limit::RateLimiter;
    use crate::testing::{item_listed, FakeCatalog};
    use std::time::Duration;

    fn fetcher(fake: Arc<FakeCatalog>, page_size: u32) -> BackfillFetcher {
        let client = CatalogClient::new(
            fake,
            Arc::new(RateLimiter::new(1000)),
            PagingPolicy {
                page_size,
                page_ceiling: 100,
                max_pages: 200,
                page_delay: Duration::ZERO,
            },
        );
        BackfillFetcher::new(Arc::new(client), 2)
    }

    fn snapshot(items: Vec<CatalogItem>) -> SellerInventorySnapshot {
        SellerInventorySnapshot {
            seller_name: "acme".to_string(),
            items,
        }
    }

    #[tokio::test]
    async fn complete_cache_is_left_alone() {
        let fake = Arc::new(FakeCatalog::new());
        let all: Vec<_> = (0..30).map(|i| item_listed(&format!("i{}", i), i)).collect();
        fake.set_inventory("acme", all.clone());
        let outcome = fetcher(fake.clone(), 10)
            .reconcile("acme", &FakeCatalog::creds(), &snapshot(all.clone()))
            .await
            .unwrap();
        assert_eq!(outcome.added, 0);
        assert_eq!(outcome.snapshot.items, all);
        assert_eq!(fake.pages_requested("acme"), vec![1]);
    }

    #[tokio::test]
    async fn tail_pages_fill_the_gap() {
        let fake = Arc::new(FakeCatalog::new());
        let all: Vec<_> = (0..100).map(|i| item_listed(&format!("i{}", i), i)).collect();
        fake.set_inventory("acme", all.clone());

        // 最後の 7 件が欠けている
        let cached = snapshot(all[..93].to_vec());
        let outcome = fetcher(fake.clone(), 10)
            .reconcile("acme", &FakeCatalog::creds(), &cached)
            .await
            .unwrap();

        assert_eq!(outcome.added, 7);
        assert_eq!(outcome.sample.len(), 5);
        assert_eq!(outcome.snapshot.items.len(), 100);
        assert_eq!(fake.pages_requested("acme"), vec![1, 8, 9, 10]);
    }

    #[tokio::test]
    async fn unobservable_catalog_is_not_walked() {
        let fake = Arc::new(FakeCatalog::new());
        fake.set_inventory("acme", vec![item_listed("a", 0)]);
        fake.report_pages("acme", 150, 15_000);
        let cached = snapshot(Vec::new());
        let outcome = fetcher(fake.clone(), 100)
            .reconcile("acme", &FakeCatalog::creds(), &cached)
            .await
            .unwrap();
        assert!(outcome.is_large_seller);
        assert!(outcome.snapshot.items.is_empty());
        assert_eq!(fake.pages_requested("acme"), vec![1]);
    }
}
