//! HTTP Catalog Client
//! reqwest によるカタログ API 呼び出し（OAuth 1.0a PLAINTEXT 署名）

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use tracing::debug;

use super::payload;
use super::{CatalogApi, SellerPageRequest};
use crate::config::CatalogConfig;
use crate::error::SyncError;
use crate::models::{CatalogCredentials, CatalogItem, CatalogPage, WantlistItem};

pub struct HttpCatalogClient {
    http: Client,
    base_url: String,
    consumer_key: String,
    consumer_secret: String,
}

impl HttpCatalogClient {
    /// Every request carries the configured timeout.
    pub fn new(config: &CatalogConfig) -> Result<Self, SyncError> {
        let http = Client::builder()
            .timeout(config.http_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            consumer_key: config.consumer_key.clone(),
            consumer_secret: config.consumer_secret.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, SyncError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| SyncError::Upstream(format!("invalid catalog base url: {}", e)))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| SyncError::Upstream("catalog base url cannot carry a path".to_string()))?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    /// OAuth 1.0a PLAINTEXT header: consumer + user token, fresh nonce per call.
    fn authorization(&self, creds: &CatalogCredentials) -> Result<HeaderValue, SyncError> {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        let timestamp = chrono::Utc::now().timestamp();
        let signature = format!(
            "{}&{}",
            oauth_escape(&self.consumer_secret),
            oauth_escape(&creds.access_secret)
        );

        let header = format!(
            "OAuth oauth_consumer_key=\"{}\", oauth_token=\"{}\", oauth_signature_method=\"PLAINTEXT\", \
             oauth_signature=\"{}\", oauth_timestamp=\"{}\", oauth_nonce=\"{}\", oauth_version=\"1.0\"",
            oauth_escape(&self.consumer_key),
            oauth_escape(&creds.access_token),
            oauth_escape(&signature),
            timestamp,
            nonce
        );
        HeaderValue::from_str(&header)
            .map_err(|e| SyncError::Upstream(format!("unusable credentials: {}", e)))
    }

    async fn get_json(
        &self,
        url: Url,
        query: &[(&str, String)],
        creds: &CatalogCredentials,
    ) -> Result<Value, SyncError> {
        debug!("GET {} {:?}", url, query);

        let response = self
            .http
            .get(url.clone())
            .query(query)
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, self.authorization(creds)?)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_seconds = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(60);
            return Err(SyncError::RateLimitExceeded { retry_after_seconds });
        }
        if !status.is_success() {
            return Err(SyncError::Upstream(format!("{} returned {}", url.path(), status)));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| SyncError::Upstream(format!("malformed response from {}: {}", url.path(), e)))
    }
}

#[async_trait]
impl CatalogApi for HttpCatalogClient {
    async fn item_detail(
        &self,
        item_id: &str,
        creds: &CatalogCredentials,
    ) -> Result<CatalogItem, SyncError> {
        let url = self.endpoint(&["marketplace", "listings", item_id])?;
        let body = self.get_json(url, &[], creds).await?;
        payload::parse_listing(&body)
    }

    async fn seller_page(
        &self,
        request: &SellerPageRequest<'_>,
        creds: &CatalogCredentials,
    ) -> Result<CatalogPage<CatalogItem>, SyncError> {
        let url = self.endpoint(&["users", request.seller_name, "inventory"])?;
        let mut query = vec![
            ("page", request.page.to_string()),
            ("per_page", request.page_size.to_string()),
        ];
        if let Some(sort) = request.sort {
            query.push(("sort", sort.field.to_string()));
            query.push(("sort_order", sort.order().to_string()));
        }
        let body = self.get_json(url, &query, creds).await?;
        payload::parse_inventory_page(&body)
    }

    async fn wantlist_page(
        &self,
        owner: &str,
        page: u32,
        page_size: u32,
        creds: &CatalogCredentials,
    ) -> Result<CatalogPage<WantlistItem>, SyncError> {
        let url = self.endpoint(&["users", owner, "wants"])?;
        let query = [("page", page.to_string()), ("per_page", page_size.to_string())];
        let body = self.get_json(url, &query, creds).await?;
        payload::parse_wantlist_page(&body)
    }
}

/// RFC 3986 percent-encoding as OAuth 1.0a requires.
fn oauth_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
