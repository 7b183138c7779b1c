//! Reaper — retention enforcement for stale sessions.
//!
//! Runs hourly (configurable). Every session whose `start_time` is older
//! than the retention window loses its backing file first, then its record.
//! A file already absent from disk is fine; any other deletion error keeps
//! the record so the next sweep retries, and the sweep moves on to the
//! remaining sessions. Session metadata never outlives the window by more
//! than one sweep interval.

use chrono::Utc;
use tokio::sync::broadcast;

use vidbooth_core::config::RetentionConfig;
use vidbooth_core::SessionStore;

// ============================================================================
// PUBLIC API
// ============================================================================

/// Report from one reap sweep.
#[derive(Debug, Clone, Default)]
pub struct ReapReport {
    pub sessions_scanned: usize,
    pub sessions_reaped: usize,
    pub files_deleted: usize,
    pub files_failed: usize,
    pub elapsed_ms: u64,
}

/// Called from main.rs to start the background sweep loop.
pub async fn run_reaper_loop(
    store: SessionStore,
    config: RetentionConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let interval = tokio::time::Duration::from_secs(config.sweep_interval_minutes * 60);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!(
        "Reaper loop started (interval: {}min, retention: {}h)",
        config.sweep_interval_minutes,
        config.max_age_hours
    );

    // Consume the interval's immediate first tick; sweeps begin one full
    // period after startup.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = run_reap_sweep(&store, &config).await;
                if report.sessions_reaped > 0 || report.files_failed > 0 {
                    tracing::info!(
                        "Reap sweep complete: {} scanned, {} reaped, {} files deleted, {} failed in {}ms",
                        report.sessions_scanned,
                        report.sessions_reaped,
                        report.files_deleted,
                        report.files_failed,
                        report.elapsed_ms
                    );
                } else {
                    tracing::debug!("Reap sweep complete: nothing expired");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Reaper loop shutting down");
                break;
            }
        }
    }
}

/// Run a single sweep over everything older than the retention window.
/// Exposed separately so tests can drive it without the ticker.
pub async fn run_reap_sweep(store: &SessionStore, config: &RetentionConfig) -> ReapReport {
    let start = std::time::Instant::now();
    let mut report = ReapReport::default();

    let cutoff = Utc::now() - chrono::Duration::hours(config.max_age_hours as i64);
    let expired = store.sessions_older_than(cutoff);
    report.sessions_scanned = expired.len();

    for session in expired {
        if let Some(path) = &session.video_path {
            match tokio::fs::remove_file(path).await {
                Ok(()) => report.files_deleted += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // Deleted out from under us; the record still goes.
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to delete {} for session {}: {} (will retry next sweep)",
                        path,
                        session.id,
                        e
                    );
                    report.files_failed += 1;
                    continue;
                }
            }
        }

        if store.remove(session.id).is_some() {
            report.sessions_reaped += 1;
        }
    }

    report.elapsed_ms = start.elapsed().as_millis() as u64;
    report
}

// ============================================================================
// TESTS
// ============================================================================
