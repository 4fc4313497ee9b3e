use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use seller_sync::config::AppConfig;
use seller_sync::{build_state, handlers, jobs};

// ========================================
// メイン
// ========================================

#[tokio::main]
async fn main() -> Result<()> {
    // ログ初期化
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = AppConfig::from_env()?;
    let state = build_state(&config).await?;

    let shutdown = CancellationToken::new();
    let job_handles = if config.enable_background_jobs {
        jobs::spawn_scheduler(state.service.clone(), shutdown.clone())
    } else {
        info!("Background jobs disabled");
        Vec::new()
    };

    let app = handlers::router(state);

    info!("🚀 Seller Sync Server listening on {}", config.bind_addr);
    info!("📦 Page ceiling {}, safety stop {} pages", config.catalog.page_ceiling, config.catalog.max_pages);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    for job in job_handles {
        job.await.ok();
    }
    Ok(())
}
