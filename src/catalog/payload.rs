//! Payload Normalizer
//! カタログ API のレスポンス（形式が揺れる）を共通の型に変換

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::warn;

use crate::error::SyncError;
use crate::models::{AvailabilityStatus, CatalogItem, CatalogPage, Pagination, WantlistItem};

const LISTING_URL_BASE: &str = "https://www.discogs.com/sell/item";

/// `{ listings: [...], pagination: {...} }`
pub fn parse_inventory_page(body: &Value) -> Result<CatalogPage<CatalogItem>, SyncError> {
    let listings = body
        .get("listings")
        .and_then(Value::as_array)
        .ok_or_else(|| SyncError::Upstream("inventory response has no listings array".to_string()))?;

    let items = listings
        .iter()
        .filter_map(|raw| match parse_listing(raw) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping malformed listing: {}", e);
                None
            }
        })
        .collect();

    Ok(CatalogPage {
        items,
        pagination: parse_pagination(body),
        received: listings.len(),
    })
}

/// `{ wants: [...], pagination: {...} }`
pub fn parse_wantlist_page(body: &Value) -> Result<CatalogPage<WantlistItem>, SyncError> {
    let wants = body
        .get("wants")
        .and_then(Value::as_array)
        .ok_or_else(|| SyncError::Upstream("wantlist response has no wants array".to_string()))?;

    let items = wants
        .iter()
        .filter_map(|raw| match parse_want(raw) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping malformed want: {}", e);
                None
            }
        })
        .collect();

    Ok(CatalogPage {
        items,
        pagination: parse_pagination(body),
        received: wants.len(),
    })
}

fn parse_pagination(body: &Value) -> Pagination {
    body.get("pagination")
        .cloned()
        .and_then(|p| serde_json::from_value(p).ok())
        .unwrap_or_default()
}

/// One listing, either from an inventory page or the single-item endpoint.
pub fn parse_listing(raw: &Value) -> Result<CatalogItem, SyncError> {
    let id = raw
        .get("id")
        .and_then(id_string)
        .ok_or_else(|| SyncError::Upstream("listing without id".to_string()))?;

    let release = raw.get("release").unwrap_or(&Value::Null);
    let creator = str_field(release, "artist");
    let title = listing_title(release, creator.as_deref());

    let (price_amount, price_currency) = listing_price(raw)
        .ok_or_else(|| SyncError::Upstream(format!("listing {} has no usable price", id)))?;

    let detail_url = str_field(raw, "uri").unwrap_or_else(|| format!("{}/{}", LISTING_URL_BASE, id));

    Ok(CatalogItem {
        catalog_ref_id: release.get("id").and_then(id_string),
        title,
        creator,
        price_amount,
        price_currency,
        condition_primary: str_field(raw, "condition").unwrap_or_default(),
        condition_secondary: str_field(raw, "sleeve_condition"),
        detail_url,
        thumbnail: str_field(release, "thumbnail").or_else(|| str_field(release, "thumb")),
        availability_status: AvailabilityStatus::from_upstream(raw.get("status").and_then(Value::as_str)),
        listed_at: str_field(raw, "posted")
            .or_else(|| str_field(raw, "listed"))
            .and_then(|s| parse_timestamp(&s)),
        id,
    })
}

fn parse_want(raw: &Value) -> Result<WantlistItem, SyncError> {
    let id = raw
        .get("id")
        .and_then(id_string)
        .ok_or_else(|| SyncError::Upstream("want without id".to_string()))?;
    let info = raw.get("basic_information").unwrap_or(&Value::Null);

    let creators = info
        .get("artists")
        .and_then(Value::as_array)
        .map(|artists| {
            artists
                .iter()
                .filter_map(|a| str_field(a, "name"))
                .collect()
        })
        .unwrap_or_default();

    let formats = info
        .get("formats")
        .and_then(Value::as_array)
        .map(|formats| formats.iter().filter_map(|f| str_field(f, "name")).collect())
        .unwrap_or_default();

    Ok(WantlistItem {
        catalog_ref_id: info.get("id").and_then(id_string).or_else(|| Some(id.clone())),
        title: str_field(info, "title").unwrap_or_else(|| "Unknown".to_string()),
        creators,
        year: info
            .get("year")
            .and_then(Value::as_i64)
            .filter(|y| *y > 0)
            .and_then(|y| i32::try_from(y).ok()),
        formats,
        thumbnail: str_field(info, "thumb"),
        date_added: str_field(raw, "date_added").and_then(|s| parse_timestamp(&s)),
        id,
    })
}

// ========================================
// Helpers
// ========================================

/// Ids arrive as numbers on some endpoints and strings on others.
fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn listing_title(release: &Value, creator: Option<&str>) -> String {
    if let Some(description) = str_field(release, "description") {
        return description;
    }
    match (creator, str_field(release, "title")) {
        (Some(artist), Some(title)) => format!("{} - {}", artist, title),
        (None, Some(title)) => title,
        _ => "Unknown".to_string(),
    }
}

/// `price: { value, currency }`, `price: 12.5` + `currency`, or `original_price: { value, curr_abbr }`.
fn listing_price(raw: &Value) -> Option<(Decimal, String)> {
    match raw.get("price") {
        Some(Value::Object(price)) => {
            let amount = price.get("value").and_then(decimal_value)?;
            let currency = price
                .get("currency")
                .and_then(Value::as_str)
                .unwrap_or("EUR")
                .to_string();
            return Some((amount, currency));
        }
        Some(v) if v.is_number() || v.is_string() => {
            let amount = decimal_value(v)?;
            let currency = str_field(raw, "currency").unwrap_or_else(|| "EUR".to_string());
            return Some((amount, currency));
        }
        _ => {}
    }

    let original = raw.get("original_price")?;
    let amount = original.get("value").and_then(decimal_value)?;
    let currency = str_field(original, "curr_abbr")
        .or_else(|| str_field(original, "currency"))
        .unwrap_or_else(|| "EUR".to_string());
    Some((amount, currency))
}

fn decimal_value(v: &Value) -> Option<Decimal> {
    match v {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_inventory_listing_with_price_object() {
        let raw = json!({
            "id": 1234,
            "status": "For Sale",
            "condition": "Very Good Plus (VG+)",
            "sleeve_condition": "Very Good (VG)",
            "posted": "2024-03-01T10:00:00-07:00",
            "uri": "https://www.discogs.com/sell/item/1234",
            "price": { "value": 12.5, "currency": "EUR" },
            "release": {
                "id": 99,
                "artist": "Boards Of Canada",
                "title": "Geogaddi",
                "description": "Boards Of Canada - Geogaddi (3xLP, Album)",
                "thumbnail": "https://img/thumb.jpg"
            }
        });
        let item = parse_listing(&raw).unwrap();
        assert_eq!(item.id, "1234");
        assert_eq!(item.catalog_ref_id.as_deref(), Some("99"));
        assert_eq!(item.title, "Boards Of Canada - Geogaddi (3xLP, Album)");
        assert_eq!(item.creator.as_deref(), Some("Boards Of Canada"));
        assert_eq!(item.price_amount, Decimal::from_str("12.5").unwrap());
        assert_eq!(item.price_currency, "EUR");
        assert_eq!(item.condition_secondary.as_deref(), Some("Very Good (VG)"));
        assert_eq!(item.availability_status, AvailabilityStatus::Available);
        assert_eq!(
            item.listed_at.unwrap().to_rfc3339(),
            "2024-03-01T17:00:00+00:00"
        );
    }

    #[test]
    fn accepts_string_ids_and_flat_prices() {
        let raw = json!({
            "id": "777",
            "price": "8.00",
            "currency": "USD",
            "condition": "Mint (M)",
            "release": { "id": "55", "title": "Untitled" }
        });
        let item = parse_listing(&raw).unwrap();
        assert_eq!(item.id, "777");
        assert_eq!(item.catalog_ref_id.as_deref(), Some("55"));
        assert_eq!(item.title, "Untitled");
        assert_eq!(item.price_currency, "USD");
        assert_eq!(item.detail_url, "https://www.discogs.com/sell/item/777");
        assert!(item.listed_at.is_none());
    }

    #[test]
    fn inventory_page_skips_malformed_listings() {
        let body = json!({
            "pagination": { "items": 2, "pages": 1, "page": 1, "per_page": 100 },
            "listings": [
                { "id": 1, "price": { "value": 1.0, "currency": "EUR" }, "release": { "id": 10 } },
                { "price": { "value": 1.0, "currency": "EUR" } }
            ]
        });
        let page = parse_inventory_page(&body).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.pagination.items, 2);
        assert_eq!(page.pagination.pages, 1);
    }

    #[test]
    fn missing_listings_array_is_an_upstream_error() {
        let body = json!({ "message": "You are making requests too quickly." });
        assert!(matches!(parse_inventory_page(&body), Err(SyncError::Upstream(_))));
    }

    #[test]
    fn parses_wantlist_entries() {
        let body = json!({
            "pagination": { "items": 1, "pages": 1, "page": 1, "per_page": 100 },
            "wants": [{
                "id": 5001,
                "date_added": "2023-01-02T03:04:05-08:00",
                "basic_information": {
                    "id": 99,
                    "title": "Geogaddi",
                    "year": 2002,
                    "thumb": "https://img/t.jpg",
                    "artists": [{ "name": "Boards Of Canada" }],
                    "formats": [{ "name": "Vinyl" }, { "name": "CD" }]
                }
            }]
        });
        let page = parse_wantlist_page(&body).unwrap();
        let want = &page.items[0];
        assert_eq!(want.id, "5001");
        assert_eq!(want.catalog_ref_id.as_deref(), Some("99"));
        assert_eq!(want.creators, vec!["Boards Of Canada".to_string()]);
        assert_eq!(want.year, Some(2002));
        assert_eq!(want.formats, vec!["Vinyl".to_string(), "CD".to_string()]);
    }
}
