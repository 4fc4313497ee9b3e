//! Test fakes shared by the unit tests.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::cache::{CacheService, MemoryCache};
use crate::catalog::{CatalogApi, CatalogClient, PagingPolicy, SellerPageRequest};
use crate::config::SyncConfig;
use crate::db;
use crate::error::SyncError;
use crate::models::{
    AvailabilityStatus, CatalogCredentials, CatalogItem, CatalogPage, Pagination, WantlistItem,
};
use crate::rate_limit::RateLimiter;
use crate::service::WantlistMatchingService;
use crate::sync::InventorySynchronizer;

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Listing `id` posted `minute` minutes after [`base_time`].
pub fn item_listed(id: &str, minute: i64) -> CatalogItem {
    CatalogItem {
        id: id.to_string(),
        catalog_ref_id: Some(format!("r-{}", id)),
        title: format!("Record {}", id),
        creator: None,
        price_amount: Decimal::from_str("10.00").unwrap(),
        price_currency: "EUR".to_string(),
        condition_primary: "Very Good Plus (VG+)".to_string(),
        condition_secondary: None,
        detail_url: format!("https://example.test/sell/item/{}", id),
        thumbnail: None,
        availability_status: AvailabilityStatus::Available,
        listed_at: Some(base_time() + Duration::minutes(minute)),
    }
}

pub fn item(id: &str, ref_id: Option<&str>, title: &str, creator: Option<&str>) -> CatalogItem {
    CatalogItem {
        catalog_ref_id: ref_id.map(str::to_string),
        title: title.to_string(),
        creator: creator.map(str::to_string),
        ..item_listed(id, 0)
    }
}

pub fn want(id: &str, ref_id: Option<&str>, title: &str, creators: &[&str]) -> WantlistItem {
    WantlistItem {
        id: id.to_string(),
        catalog_ref_id: ref_id.map(str::to_string),
        title: title.to_string(),
        creators: creators.iter().map(|c| c.to_string()).collect(),
        year: None,
        formats: Vec::new(),
        thumbnail: None,
        date_added: None,
    }
}

/// Scripted catalog: whole inventories per seller, paged on demand.
#[derive(Default)]
pub struct FakeCatalog {
    inventories: Mutex<HashMap<String, Vec<CatalogItem>>>,
    reported: Mutex<HashMap<String, (u32, u64)>>,
    failures: Mutex<HashMap<(String, u32), SyncError>>,
    wantlists: Mutex<HashMap<String, Vec<WantlistItem>>>,
    calls: Mutex<Vec<(String, u32)>>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn creds() -> CatalogCredentials {
        CatalogCredentials::new("token", "secret")
    }

    pub fn set_inventory(&self, seller: &str, items: Vec<CatalogItem>) {
        self.inventories.lock().unwrap().insert(seller.to_string(), items);
    }

    /// Overrides the pagination totals reported for `seller`.
    pub fn report_pages(&self, seller: &str, pages: u32, items: u64) {
        self.reported.lock().unwrap().insert(seller.to_string(), (pages, items));
    }

    pub fn fail_page(&self, seller: &str, page: u32, error: SyncError) {
        self.failures.lock().unwrap().insert((seller.to_string(), page), error);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn set_wantlist(&self, owner: &str, wants: Vec<WantlistItem>) {
        self.wantlists.lock().unwrap().insert(owner.to_string(), wants);
    }

    pub fn pages_requested(&self, seller: &str) -> Vec<u32> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == seller)
            .map(|(_, p)| *p)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn page_of<T: Clone>(all: &[T], page: u32, page_size: u32) -> Vec<T> {
        let start = ((page.max(1) - 1) * page_size) as usize;
        all.iter().skip(start).take(page_size as usize).cloned().collect()
    }

    fn pagination(total: usize, page: u32, page_size: u32) -> Pagination {
        let size = page_size.max(1) as usize;
        Pagination {
            items: total as u64,
            pages: ((total + size - 1) / size) as u32,
            page,
            per_page: page_size,
        }
    }
}

#[async_trait]
impl CatalogApi for FakeCatalog {
    async fn item_detail(
        &self,
        item_id: &str,
        _creds: &CatalogCredentials,
    ) -> Result<CatalogItem, SyncError> {
        self.inventories
            .lock()
            .unwrap()
            .values()
            .flatten()
            .find(|i| i.id == item_id)
            .cloned()
            .ok_or_else(|| SyncError::Upstream(format!("listing {} returned 404", item_id)))
    }

    async fn seller_page(
        &self,
        request: &SellerPageRequest<'_>,
        _creds: &CatalogCredentials,
    ) -> Result<CatalogPage<CatalogItem>, SyncError> {
        let seller = request.seller_name.to_string();
        self.calls.lock().unwrap().push((seller.clone(), request.page));

        if let Some(error) = self.failures.lock().unwrap().get(&(seller.clone(), request.page)) {
            return Err(error.clone());
        }

        let mut all = self
            .inventories
            .lock()
            .unwrap()
            .get(&seller)
            .cloned()
            .unwrap_or_default();
        if request.sort.map(|s| s.descending).unwrap_or(false) {
            all.sort_by(|a, b| b.listed_at.cmp(&a.listed_at));
        }

        let mut pagination = Self::pagination(all.len(), request.page, request.page_size);
        if let Some((pages, items)) = self.reported.lock().unwrap().get(&seller) {
            pagination.pages = *pages;
            pagination.items = *items;
        }

        Ok(CatalogPage::new(
            Self::page_of(&all, request.page, request.page_size),
            pagination,
        ))
    }

    async fn wantlist_page(
        &self,
        owner: &str,
        page: u32,
        page_size: u32,
        _creds: &CatalogCredentials,
    ) -> Result<CatalogPage<WantlistItem>, SyncError> {
        let all = self
            .wantlists
            .lock()
            .unwrap()
            .get(owner)
            .cloned()
            .ok_or_else(|| SyncError::Upstream(format!("wantlist of {} returned 404", owner)))?;
        Ok(CatalogPage::new(
            Self::page_of(&all, page, page_size),
            Self::pagination(all.len(), page, page_size),
        ))
    }
}

// ========================================
// Service fixture
// ========================================

pub fn memory_cache() -> CacheService {
    CacheService::new(Arc::new(MemoryCache::new()))
}

pub struct ServiceFixture {
    pub _dir: tempfile::TempDir,
    pub fake: Arc<FakeCatalog>,
    pub service: Arc<WantlistMatchingService>,
    /// "alice", holding credentials and two wants.
    pub user_id: i64,
}

/// Temp SQLite with one user, sellers "acme" (order) and "beta" (favourite).
pub async fn fixture(cache: CacheService, page_size: u32, page_delay: StdDuration) -> ServiceFixture {
    let dir = tempfile::tempdir().unwrap();
    let pool = db::init_db(dir.path().join("svc.db").to_str().unwrap())
        .await
        .unwrap();
    let user_id = db::insert_user(&pool, "alice", Some("alice_dg"), Some(&FakeCatalog::creds()))
        .await
        .unwrap();
    db::insert_order(&pool, "acme", "building").await.unwrap();
    db::add_favorite_seller(&pool, user_id, "beta").await.unwrap();

    let fake = Arc::new(FakeCatalog::new());
    fake.set_wantlist(
        "alice_dg",
        vec![
            want("w1", Some("99"), "Geogaddi", &["Boards of Canada"]),
            want("w2", None, "Selected Ambient Works 85-92", &["Aphex Twin"]),
        ],
    );
    fake.set_inventory(
        "acme",
        vec![
            item("a1", Some("99"), "Boards Of Canada - Geogaddi (3xLP)", Some("Boards Of Canada")),
            item("a2", Some("500"), "Unrelated Record", None),
        ],
    );
    fake.set_inventory(
        "beta",
        vec![item("b1", None, "Selected Ambient Works 85-92", Some("Aphex Twin"))],
    );

    let client = CatalogClient::new(
        fake.clone(),
        Arc::new(RateLimiter::new(10_000)),
        PagingPolicy {
            page_size,
            page_ceiling: 100,
            max_pages: 200,
            page_delay,
        },
    );
    let sync = Arc::new(InventorySynchronizer::new(
        Arc::new(client),
        cache.clone(),
        SyncConfig::default(),
    ));
    let service = Arc::new(WantlistMatchingService::new(pool, sync, cache, SyncConfig::default()));
    ServiceFixture {
        _dir: dir,
        fake,
        service,
        user_id,
    }
}
