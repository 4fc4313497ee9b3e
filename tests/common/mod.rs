//! Throw-away catalog server for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};

use seller_sync::config::{AppConfig, CatalogConfig};

/// Listings the fake "acme" shop holds, newest first.
pub const ACME_LISTINGS: u64 = 5;

#[derive(Default)]
pub struct FakeState {
    pub requests: AtomicUsize,
}

impl FakeState {
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

pub struct FakeCatalogServer {
    pub base_url: String,
    pub state: Arc<FakeState>,
}

/// Binds on an ephemeral port and serves until the test runtime ends.
pub async fn spawn_catalog() -> FakeCatalogServer {
    let state = Arc::new(FakeState::default());
    let app = Router::new()
        .route("/users/:seller/inventory", get(inventory))
        .route("/users/:owner/wants", get(wants))
        .route("/marketplace/listings/:id", get(listing))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeCatalogServer {
        base_url: format!("http://{}", addr),
        state,
    }
}

/// Config pointing every component at the fake server with no pacing.
pub fn test_config(base_url: &str, database_path: &str) -> AppConfig {
    AppConfig {
        database_path: database_path.to_string(),
        redis_url: Some("memory://".to_string()),
        catalog: CatalogConfig {
            base_url: base_url.to_string(),
            consumer_key: "ck".to_string(),
            consumer_secret: "cs".to_string(),
            page_size: 2,
            page_delay: Duration::ZERO,
            http_timeout: Duration::from_secs(5),
            ..CatalogConfig::default()
        },
        ..AppConfig::default()
    }
}

pub fn listing_json(id: u64) -> Value {
    json!({
        "id": id,
        "status": "For Sale",
        "condition": "Near Mint (NM or M-)",
        "posted": format!("2024-01-{:02}T12:00:00Z", id),
        "price": { "value": 10.5, "currency": "EUR" },
        "release": {
            "id": 100 + id,
            "artist": format!("Artist {}", id),
            "title": format!("Title {}", id),
            "description": format!("Artist {} - Title {}", id, id)
        }
    })
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("OAuth ") && v.contains("oauth_token="))
}

fn page_params(query: &HashMap<String, String>) -> (u64, u64) {
    let page = query.get("page").and_then(|v| v.parse().ok()).unwrap_or(1);
    let per_page = query.get("per_page").and_then(|v| v.parse().ok()).unwrap_or(50);
    (page, per_page)
}

async fn inventory(
    State(state): State<Arc<FakeState>>,
    Path(seller): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let (page, per_page) = page_params(&query);
    match seller.as_str() {
        "busy" => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, "30")],
            "slow down",
        )
            .into_response(),
        "broken" => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        "huge" => Json(json!({
            "pagination": { "page": page, "pages": 150, "per_page": per_page, "items": 150 * per_page },
            "listings": [listing_json(1)]
        }))
        .into_response(),
        "acme" => {
            let ids: Vec<u64> = (1..=ACME_LISTINGS).rev().collect();
            let start = ((page - 1) * per_page) as usize;
            let listings: Vec<Value> = ids
                .iter()
                .skip(start)
                .take(per_page as usize)
                .map(|id| listing_json(*id))
                .collect();
            Json(json!({
                "pagination": {
                    "page": page,
                    "pages": ACME_LISTINGS.div_ceil(per_page),
                    "per_page": per_page,
                    "items": ACME_LISTINGS
                },
                "listings": listings
            }))
            .into_response()
        }
        _ => (StatusCode::NOT_FOUND, "unknown seller").into_response(),
    }
}

async fn wants(
    State(state): State<Arc<FakeState>>,
    Path(owner): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if owner != "alice_dg" {
        return (StatusCode::NOT_FOUND, "no such user").into_response();
    }

    let (page, per_page) = page_params(&query);
    Json(json!({
        "pagination": { "page": page, "pages": 1, "per_page": per_page, "items": 1 },
        "wants": [{
            "id": 9001,
            "date_added": "2023-06-01T00:00:00Z",
            "basic_information": {
                "id": 103,
                "title": "Title 3",
                "year": 1999,
                "artists": [{ "name": "Artist 3" }],
                "formats": [{ "name": "Vinyl" }]
            }
        }]
    }))
    .into_response()
}

async fn listing(
    State(state): State<Arc<FakeState>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if id == 0 || id > ACME_LISTINGS {
        return (StatusCode::NOT_FOUND, "gone").into_response();
    }
    Json(listing_json(id)).into_response()
}
