//! Catalog Client
//! カタログ API のページング・レート制限・ページ間ディレイをまとめる層

pub mod http;
pub mod payload;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::CatalogConfig;
use crate::error::SyncError;
use crate::models::{CatalogCredentials, CatalogItem, CatalogPage, Pagination, SortSpec, WantlistItem};
use crate::rate_limit::RateLimiter;

pub use http::HttpCatalogClient;

// ========================================
// Transport
// ========================================

#[derive(Debug, Clone, Copy)]
pub struct SellerPageRequest<'a> {
    pub seller_name: &'a str,
    pub page: u32,
    pub page_size: u32,
    pub sort: Option<SortSpec>,
}

/// Raw single-call access to the remote catalog. No rate limiting here.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn item_detail(
        &self,
        item_id: &str,
        creds: &CatalogCredentials,
    ) -> Result<CatalogItem, SyncError>;

    async fn seller_page(
        &self,
        request: &SellerPageRequest<'_>,
        creds: &CatalogCredentials,
    ) -> Result<CatalogPage<CatalogItem>, SyncError>;

    async fn wantlist_page(
        &self,
        owner: &str,
        page: u32,
        page_size: u32,
        creds: &CatalogCredentials,
    ) -> Result<CatalogPage<WantlistItem>, SyncError>;
}

// ========================================
// Paging policy
// ========================================

#[derive(Debug, Clone, Copy)]
pub struct PagingPolicy {
    pub page_size: u32,
    /// Upstream rejects any page above this.
    pub page_ceiling: u32,
    /// Safety stop for a single walk.
    pub max_pages: u32,
    /// Pause between consecutive pages of one walk.
    pub page_delay: Duration,
}

impl From<&CatalogConfig> for PagingPolicy {
    fn from(config: &CatalogConfig) -> Self {
        Self {
            page_size: config.page_size,
            page_ceiling: config.page_ceiling,
            max_pages: config.max_pages,
            page_delay: config.page_delay,
        }
    }
}

impl PagingPolicy {
    /// Last page any walk may request.
    pub fn last_walkable_page(&self) -> u32 {
        self.page_ceiling.min(self.max_pages).max(1)
    }

    pub fn is_unobservable(&self, total_pages: u32) -> bool {
        total_pages > self.page_ceiling
    }
}

// ========================================
// Walk results
// ========================================

#[derive(Debug, Clone)]
pub enum FullCatalog {
    Complete {
        items: Vec<CatalogItem>,
        pagination: Pagination,
    },
    /// Page 1 reported more pages than the upstream will serve; nothing past
    /// page 1 was requested.
    Unobservable { total_pages: u32, total_items: u64 },
}

#[derive(Debug, Clone)]
pub struct NewListings {
    /// Items strictly newer than the watermark, newest first.
    pub items: Vec<CatalogItem>,
    /// Pagination as reported by the first page of the walk.
    pub pagination: Pagination,
    pub checked: usize,
}

// ========================================
// Client
// ========================================

/// Rate-limited, paginating front of a [`CatalogApi`].
pub struct CatalogClient {
    api: Arc<dyn CatalogApi>,
    limiter: Arc<RateLimiter>,
    paging: PagingPolicy,
}

impl CatalogClient {
    pub fn new(api: Arc<dyn CatalogApi>, limiter: Arc<RateLimiter>, paging: PagingPolicy) -> Self {
        Self { api, limiter, paging }
    }

    pub fn paging(&self) -> &PagingPolicy {
        &self.paging
    }

    /// Inter-page delay of one walk.
    pub async fn pause(&self) {
        if !self.paging.page_delay.is_zero() {
            tokio::time::sleep(self.paging.page_delay).await;
        }
    }

    pub async fn fetch_item_detail(
        &self,
        item_id: &str,
        creds: &CatalogCredentials,
    ) -> Result<CatalogItem, SyncError> {
        self.limiter.check_limit()?;
        self.api.item_detail(item_id, creds).await
    }

    pub async fn fetch_seller_page(
        &self,
        seller_name: &str,
        page: u32,
        page_size: u32,
        sort: Option<SortSpec>,
        creds: &CatalogCredentials,
    ) -> Result<CatalogPage<CatalogItem>, SyncError> {
        // 上限超えのページは API が拒否するので呼ばない
        if page > self.paging.page_ceiling {
            return Err(SyncError::Unobservable {
                seller_name: seller_name.to_string(),
                total_pages: page,
            });
        }
        self.limiter.check_limit()?;
        let request = SellerPageRequest {
            seller_name,
            page,
            page_size,
            sort,
        };
        self.api.seller_page(&request, creds).await
    }

    /// Walks the whole catalog from page 1. Any failure aborts the walk and
    /// discards what was read so far.
    pub async fn fetch_full_seller_catalog(
        &self,
        seller_name: &str,
        creds: &CatalogCredentials,
    ) -> Result<FullCatalog, SyncError> {
        let size = self.paging.page_size;
        let first = self.fetch_seller_page(seller_name, 1, size, None, creds).await?;
        let pagination = first.pagination;

        if self.paging.is_unobservable(pagination.pages) {
            info!(
                "Seller {} exceeds the page ceiling ({} pages, {} items)",
                seller_name, pagination.pages, pagination.items
            );
            return Ok(FullCatalog::Unobservable {
                total_pages: pagination.pages,
                total_items: pagination.items,
            });
        }

        let mut last_len = first.received;
        let mut items = first.items;
        let mut page = 1;

        while !self.walk_finished(page, last_len, &pagination) {
            page += 1;
            self.pause().await;
            let next = self.fetch_seller_page(seller_name, page, size, None, creds).await?;
            last_len = next.received;
            items.extend(next.items);
        }

        debug!("Fetched {} items for {} over {} pages", items.len(), seller_name, page);
        Ok(FullCatalog::Complete { items, pagination })
    }

    /// Newest-first walk that stops at the first item not strictly newer than
    /// `watermark`.
    pub async fn fetch_listed_since(
        &self,
        seller_name: &str,
        watermark: DateTime<Utc>,
        creds: &CatalogCredentials,
    ) -> Result<NewListings, SyncError> {
        let size = self.paging.page_size;
        let mut items = Vec::new();
        let mut checked = 0;
        let mut first_pagination = None;
        let mut page = 1;

        loop {
            if page > 1 {
                self.pause().await;
            }
            let current = self
                .fetch_seller_page(seller_name, page, size, Some(SortSpec::LISTED_DESC), creds)
                .await?;
            let pagination = *first_pagination.get_or_insert(current.pagination);
            let page_len = current.received;

            let mut reached_watermark = false;
            for item in current.items {
                checked += 1;
                match item.listed_at {
                    Some(listed_at) if listed_at > watermark => items.push(item),
                    _ => {
                        reached_watermark = true;
                        break;
                    }
                }
            }

            if reached_watermark || self.walk_finished(page, page_len, &pagination) {
                break;
            }
            page += 1;
        }

        Ok(NewListings {
            items,
            pagination: first_pagination.unwrap_or_default(),
            checked,
        })
    }

    /// The owner's whole want-list, paginated like the inventory walk.
    pub async fn fetch_wantlist(
        &self,
        owner: &str,
        creds: &CatalogCredentials,
    ) -> Result<Vec<WantlistItem>, SyncError> {
        let size = self.paging.page_size;
        let mut wants = Vec::new();
        let mut page = 1;

        loop {
            if page > 1 {
                self.pause().await;
            }
            self.limiter.check_limit()?;
            let current = self.api.wantlist_page(owner, page, size, creds).await?;
            let page_len = current.received;
            wants.extend(current.items);

            if self.walk_finished(page, page_len, &current.pagination) {
                break;
            }
            page += 1;
        }

        Ok(wants)
    }

    /// Short page (as sent upstream, before parsing), last reported page, or
    /// the walk ceiling.
    fn walk_finished(&self, page: u32, page_len: usize, pagination: &Pagination) -> bool {
        page_len < self.paging.page_size as usize
            || (pagination.pages > 0 && page >= pagination.pages)
            || page >= self.paging.last_walkable_page()
    }
}
