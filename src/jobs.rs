//! Background Jobs
//! 夜間の全セラー再同期・ウォントリスト更新・マッチ結果の掃除、6 時間ごとのアクティブセラー更新

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::keys;
use crate::db;
use crate::error::SyncError;
use crate::service::WantlistMatchingService;

/// Pause between consecutive sellers or users inside one job.
pub const ITEM_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Every day at `hour`:00 UTC.
    DailyAt { hour: u32 },
    Every(Duration),
}

impl Schedule {
    pub fn next_run(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Schedule::DailyAt { hour } => {
                let at = NaiveTime::from_hms_opt(hour % 24, 0, 0).unwrap_or_default();
                let today = Utc.from_utc_datetime(&now.date_naive().and_time(at));
                if today > now {
                    today
                } else {
                    today + ChronoDuration::days(1)
                }
            }
            Schedule::Every(period) => {
                now + ChronoDuration::from_std(period).unwrap_or(ChronoDuration::hours(6))
            }
        }
    }
}

/// Outcome counters of one job run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobReport {
    pub succeeded: usize,
    pub failed: usize,
}

// ========================================
// Jobs
// ========================================

/// Force-refreshes every registered seller with the first user that holds
/// credentials.
pub async fn resync_all_sellers(
    service: &WantlistMatchingService,
    pause: Duration,
) -> Result<JobReport, SyncError> {
    refresh_sellers(service, service.registered_sellers().await?, true, pause).await
}

/// Refresh-if-stale for sellers of orders still open.
pub async fn refresh_active_sellers(
    service: &WantlistMatchingService,
    pause: Duration,
) -> Result<JobReport, SyncError> {
    refresh_sellers(service, service.active_sellers().await?, false, pause).await
}

async fn refresh_sellers(
    service: &WantlistMatchingService,
    sellers: Vec<String>,
    force: bool,
    pause: Duration,
) -> Result<JobReport, SyncError> {
    let mut report = JobReport::default();
    if sellers.is_empty() {
        info!("No sellers to refresh");
        return Ok(report);
    }

    let users = db::users_with_credentials(service.db())
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;
    let Some(user) = users.first() else {
        warn!("No user with catalog credentials, skipping {} sellers", sellers.len());
        return Ok(report);
    };

    for (i, seller_name) in sellers.iter().enumerate() {
        if i > 0 && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        match service.refresh_seller(seller_name, user.id, force).await {
            Ok(outcome) => {
                debug!("Refreshed {} via {:?}", seller_name, outcome.path);
                report.succeeded += 1;
            }
            Err(e) => {
                warn!("Refresh of {} failed: {}", seller_name, e);
                report.failed += 1;
            }
        }
    }

    info!(
        "🎉 Seller refresh done: {} ok, {} failed",
        report.succeeded, report.failed
    );
    Ok(report)
}

pub async fn refresh_all_wantlists(
    service: &WantlistMatchingService,
    pause: Duration,
) -> Result<JobReport, SyncError> {
    let users = db::users_with_credentials(service.db())
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;
    let mut report = JobReport::default();

    for (i, user) in users.iter().enumerate() {
        if i > 0 && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        match service.refresh_wantlist(user.id).await {
            Ok(count) => {
                debug!("Wantlist of user {} refreshed ({} items)", user.id, count);
                report.succeeded += 1;
            }
            Err(e) => {
                warn!("Wantlist refresh for user {} failed: {}", user.id, e);
                report.failed += 1;
            }
        }
    }

    info!(
        "Wantlist refresh done: {} ok, {} failed",
        report.succeeded, report.failed
    );
    Ok(report)
}

/// Drops every memoized match result.
pub async fn purge_match_cache(service: &WantlistMatchingService) -> u64 {
    let removed = service.cache().delete_pattern(keys::MATCHES_PATTERN).await;
    info!("🧹 Purged {} memoized match results", removed);
    removed
}

// ========================================
// Scheduler
// ========================================

/// Starts one task per job. All of them stop when `shutdown` is cancelled.
pub fn spawn_scheduler(
    service: Arc<WantlistMatchingService>,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    info!("Starting background jobs");
    vec![
        spawn_job("full-resync", Schedule::DailyAt { hour: 2 }, shutdown.clone(), {
            let service = service.clone();
            move || {
                let service = service.clone();
                async move {
                    if let Err(e) = resync_all_sellers(&service, ITEM_PAUSE).await {
                        error!("Nightly resync failed: {}", e);
                    }
                }
            }
        }),
        spawn_job("wantlist-refresh", Schedule::DailyAt { hour: 3 }, shutdown.clone(), {
            let service = service.clone();
            move || {
                let service = service.clone();
                async move {
                    if let Err(e) = refresh_all_wantlists(&service, ITEM_PAUSE).await {
                        error!("Nightly wantlist refresh failed: {}", e);
                    }
                }
            }
        }),
        spawn_job("match-purge", Schedule::DailyAt { hour: 4 }, shutdown.clone(), {
            let service = service.clone();
            move || {
                let service = service.clone();
                async move {
                    purge_match_cache(&service).await;
                }
            }
        }),
        spawn_job(
            "active-refresh",
            Schedule::Every(Duration::from_secs(6 * 60 * 60)),
            shutdown,
            move || {
                let service = service.clone();
                async move {
                    if let Err(e) = refresh_active_sellers(&service, ITEM_PAUSE).await {
                        error!("Active seller refresh failed: {}", e);
                    }
                }
            },
        ),
    ]
}

fn spawn_job<F, Fut>(
    name: &'static str,
    schedule: Schedule,
    shutdown: CancellationToken,
    mut run: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let next = schedule.next_run(now);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!("Job {} next run at {}", name, next);

            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Job {} shutting down", name);
                    break;
                }
                () = tokio::time::sleep(wait) => {}
            }

            info!("⏰ Running job {}", name);
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Job {} cancelled mid-run", name);
                    break;
                }
                () = run() => {}
            }
        }
    })
}
