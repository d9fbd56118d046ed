//! Daemon wiring: storage, engine, UDS server and the polling scheduler.
//! The scheduler runs as a tokio task and rebuilds its intervals whenever
//! the settings change.

use std::sync::Arc;

use tokio::time::{Duration, Interval, MissedTickBehavior, interval};

use crate::catalog::HttpCatalogFetcher;
use crate::cli::DaemonOpts;
use crate::clock::SystemClock;
use crate::engine::Engine;
use crate::server;
use crate::store::JsonFileStore;

/// Run the daemon: starts the scheduler and UDS server, waits for a
/// shutdown signal, then flushes pending commits.
pub async fn run_daemon(opts: DaemonOpts, socket_path: &str) -> anyhow::Result<()> {
    let store = Arc::new(JsonFileStore::new(
        opts.store.unwrap_or_else(crate::cli::default_store_path),
    ));
    tracing::info!("store at {}", store.path().display());
    let fetcher = Arc::new(HttpCatalogFetcher::new(opts.catalog_endpoint)?);
    let engine = Engine::start(store, fetcher, Arc::new(SystemClock)).await?;

    // Start UDS server
    let server_engine = Arc::clone(&engine);
    let server_socket = socket_path.to_string();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_server(&server_socket, server_engine).await {
            tracing::error!("UDS server error: {e}");
        }
    });

    // Start scheduler
    let poll_engine = Arc::clone(&engine);
    let poll_handle = tokio::spawn(async move {
        run_scheduler(poll_engine).await;
    });

    // Wait for shutdown signal (ctrl-c or SIGTERM)
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => tokio::select! {
                    _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                },
                Err(e) => {
                    tracing::warn!("cannot register SIGTERM handler: {e}");
                    ctrl_c.await.ok();
                    tracing::info!("received ctrl-c, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
    };

    tokio::select! {
        () = shutdown => {}
        _ = poll_handle => {
            tracing::warn!("scheduler exited unexpectedly");
        }
        _ = server_handle => {
            tracing::warn!("server exited unexpectedly");
        }
    }

    engine.shutdown().await;
    // Cleanup socket
    let _ = std::fs::remove_file(socket_path);
    tracing::info!("daemon stopped");
    Ok(())
}

struct Tickers {
    coarse: Interval,
    focused: Interval,
    flush: Interval,
    live: Interval,
}

impl Tickers {
    fn new(settings: &booktimer_core::Settings) -> Self {
        let ticker = |ms: u64| {
            let mut t = interval(Duration::from_millis(ms.max(1)));
            t.set_missed_tick_behavior(MissedTickBehavior::Skip);
            t
        };
        Self {
            coarse: ticker(settings.global_scan_interval_ms),
            focused: ticker(settings.focused_poll_interval_ms),
            flush: ticker(settings.realtime_flush_ms),
            live: ticker(settings.live_push_interval_ms),
        }
    }
}

/// Coarse sweep, focused sweep, AUTO_FLUSH and live pushes, each on its
/// own interval. Every tick only enqueues onto tab lanes.
pub async fn run_scheduler(engine: Arc<Engine>) {
    let mut settings_rx = engine.watch_settings();
    loop {
        let settings = settings_rx.borrow_and_update().clone();
        let mut tickers = Tickers::new(&settings);
        tracing::debug!(
            coarse_ms = settings.global_scan_interval_ms,
            focused_ms = settings.focused_poll_interval_ms,
            flush_ms = settings.realtime_flush_ms,
            live_ms = settings.live_push_interval_ms,
            "scheduler intervals"
        );

        loop {
            tokio::select! {
                _ = tickers.coarse.tick() => engine.sweep_all(),
                _ = tickers.focused.tick() => engine.sweep_focused(),
                _ = tickers.flush.tick() => engine.flush_all(),
                _ = tickers.live.tick() => {
                    engine.push_live();
                }
                () = engine.live().push_requested() => {
                    engine.push_live();
                }
                changed = settings_rx.changed() => {
                    if changed.is_err() {
                        tracing::warn!("settings channel closed, scheduler stopping");
                        return;
                    }
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{EP1, EP1_TITLE, Harness, eventually};
    use serde_json::json;

    // ── 1. Scheduler ────────────────────────────────────────────────

    #[tokio::test]
    async fn scheduler_sweeps_and_flushes() {
        let h = Harness::start().await;
        h.engine
            .set_settings(&json!({"globalScanIntervalMs": 5, "realtimeFlushMs": 5}))
            .expect("valid settings");
        let task = tokio::spawn(run_scheduler(Arc::clone(&h.engine)));

        h.navigate(1, EP1, EP1_TITLE).await;
        h.clock.advance_ms(600);
        eventually(|| h.engine.dump_state().first().is_some_and(|st| st.is_reading())).await;

        h.clock.advance_ms(5_000);
        eventually(|| h.engine.stats().total == 5_000).await;
        task.abort();
    }

    #[tokio::test]
    async fn scheduler_pushes_live_after_commit() {
        let h = Harness::start().await;
        let mut rx = h.engine.subscribe();
        let task = tokio::spawn(run_scheduler(Arc::clone(&h.engine)));

        // Initial push of the empty ledger.
        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("push in time")
            .expect("channel open");
        assert_eq!(first.total, 0);

        h.engine.import_store(&json!({"rt_total_ms": 1_234})).expect("imports");
        let next = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("push in time")
            .expect("channel open");
        assert_eq!(next.total, 1_234);
        task.abort();
    }
}
