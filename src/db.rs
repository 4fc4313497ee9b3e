//! Database Module
//! SQLite を使用した users/orders/favorite_sellers の管理（同期エンジンからは読み取り中心）

use anyhow::Result;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, Pool, Sqlite};
use tracing::info;

use crate::models::CatalogCredentials;

/// データベース接続プール
pub type DbPool = Pool<Sqlite>;

/// Orders still collecting items.
pub const ACTIVE_ORDER_STATUSES: [&str; 2] = ["building", "validation"];

/// データベースを初期化
pub async fn init_db(db_path: &str) -> Result<DbPool> {
    if let Some(parent) = std::path::Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let db_url = format!("sqlite:{}?mode=rwc", db_path);

    info!("Initializing database: {}", db_path);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    create_schema(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

/// スキーマ作成
async fn create_schema(pool: &DbPool) -> Result<()> {
    // users テーブル（カタログ API のアクセストークンを保持）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            discogs_username TEXT,
            discogs_access_token TEXT,
            discogs_access_secret TEXT
        )
    "#)
    .execute(pool)
    .await?;

    // orders テーブル（グループ購入の単位 = 1 セラー）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            seller_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'building',
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
    "#)
    .execute(pool)
    .await?;

    // favorite_sellers テーブル
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS favorite_sellers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            seller_name TEXT NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id),
            UNIQUE(user_id, seller_name)
        )
    "#)
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_seller ON orders(seller_name)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_favorite_sellers_user ON favorite_sellers(user_id)")
        .execute(pool).await?;

    Ok(())
}

// ========================================
// Users
// ========================================

#[derive(Debug, Clone, FromRow)]
pub struct UserAccount {
    pub id: i64,
    pub username: String,
    pub discogs_username: Option<String>,
    pub discogs_access_token: Option<String>,
    pub discogs_access_secret: Option<String>,
}

impl UserAccount {
    /// Token pair, if both halves are present and non-empty.
    pub fn credentials(&self) -> Option<CatalogCredentials> {
        let creds = CatalogCredentials::new(
            self.discogs_access_token.clone()?,
            self.discogs_access_secret.clone()?,
        );
        creds.is_usable().then_some(creds)
    }

    /// Name the want-list lives under on the catalog side.
    pub fn catalog_username(&self) -> &str {
        self.discogs_username
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

pub async fn find_user(pool: &DbPool, user_id: i64) -> Result<Option<UserAccount>> {
    let user = sqlx::query_as::<_, UserAccount>(
        "SELECT id, username, discogs_username, discogs_access_token, discogs_access_secret \
         FROM users WHERE id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

/// Users holding a token pair, oldest account first.
pub async fn users_with_credentials(pool: &DbPool) -> Result<Vec<UserAccount>> {
    let users = sqlx::query_as::<_, UserAccount>(
        "SELECT id, username, discogs_username, discogs_access_token, discogs_access_secret \
         FROM users \
         WHERE discogs_access_token IS NOT NULL AND discogs_access_token != '' \
           AND discogs_access_secret IS NOT NULL AND discogs_access_secret != '' \
         ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(users)
}

pub async fn insert_user(
    pool: &DbPool,
    username: &str,
    discogs_username: Option<&str>,
    credentials: Option<&CatalogCredentials>,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO users (username, discogs_username, discogs_access_token, discogs_access_secret) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(username)
    .bind(discogs_username)
    .bind(credentials.map(|c| c.access_token.as_str()))
    .bind(credentials.map(|c| c.access_secret.as_str()))
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

// ========================================
// Sellers
// ========================================

/// Distinct seller names across all orders and favourites, sorted.
pub async fn registered_seller_names(pool: &DbPool) -> Result<Vec<String>> {
    let names: Vec<(String,)> = sqlx::query_as(
        "SELECT seller_name FROM orders WHERE seller_name != '' \
         UNION \
         SELECT seller_name FROM favorite_sellers WHERE seller_name != '' \
         ORDER BY seller_name",
    )
    .fetch_all(pool)
    .await?;
    Ok(names.into_iter().map(|(n,)| n).collect())
}

/// Sellers of orders that are still building or in validation.
pub async fn active_seller_names(pool: &DbPool) -> Result<Vec<String>> {
    let names: Vec<(String,)> = sqlx::query_as(
        "SELECT DISTINCT seller_name FROM orders \
         WHERE status IN (?, ?) AND seller_name != '' \
         ORDER BY seller_name",
    )
    .bind(ACTIVE_ORDER_STATUSES[0])
    .bind(ACTIVE_ORDER_STATUSES[1])
    .fetch_all(pool)
    .await?;
    Ok(names.into_iter().map(|(n,)| n).collect())
}

pub async fn insert_order(pool: &DbPool, seller_name: &str, status: &str) -> Result<i64> {
    let result = sqlx::query("INSERT INTO orders (seller_name, status) VALUES (?, ?)")
        .bind(seller_name)
        .bind(status)
        .execute(pool)
        .await?;
    Ok(result.last_insert_rowid())
}

pub async fn add_favorite_seller(pool: &DbPool, user_id: i64, seller_name: &str) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO favorite_sellers (user_id, seller_name) VALUES (?, ?)")
        .bind(user_id)
        .bind(seller_name)
        .execute(pool)
        .await?;
    Ok(())
}
