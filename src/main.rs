//! Application entry point for the `aquasense-history` service.
//!
//! Startup sequence:
//! - Initializing structured logging/tracing
//! - Loading configuration from environment variables or `.env`
//! - Connecting the configured reading store (Postgres, HTTP document store,
//!   or in-memory) and creating the Postgres schema when needed
//! - Restoring the cache snapshot, if one is configured
//! - Starting the cache sweeper and the dashboard auto-refresh
//! - Mounting all API routes via the `routes` gateway (EMBP pattern)
//! - Serving until Ctrl-C, then stopping background tasks and saving the
//!   cache snapshot
//!
//! # Environment Variables
//! See [`aquasense_history::config::load_from_env`] for the full list.
//! Logging is controlled by `AQUASENSE_LOG_LEVEL` (default: `debug`) and
//! `AQUASENSE_SPAN_EVENTS`, unless `RUST_LOG` is set.
use std::{env, io::IsTerminal, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use aquasense_history::orchestrator::spawn_cache_sweeper;
use aquasense_history::routes::{self, AppState};
use aquasense_history::{
    config, schema, CacheStore, Clock, Config, FetchOrchestrator, HistoricalDataService,
    HttpReadingStore, MemoryStore, PgReadingStore, ReadingStore, StoreBackend, SystemClock,
    ViewQuery,
};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let store = connect_store(&cfg).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let cache = Arc::new(CacheStore::new(cfg.cache_ttl(), Arc::clone(&clock)));
    if let Some(path) = &cfg.cache_snapshot_path {
        match cache.load_snapshot(path).await {
            Ok(restored) => tracing::info!("Restored {} cache entries from {:?}", restored, path),
            Err(e) => tracing::warn!("Ignoring unreadable cache snapshot: {}", e),
        }
    }

    let service = Arc::new(HistoricalDataService::new(
        store,
        Arc::clone(&cache),
        clock,
        cfg.timezone,
        cfg.service_settings(),
    ));
    let orchestrator = Arc::new(FetchOrchestrator::new(
        Arc::clone(&service),
        cfg.refresh_debounce(),
    ));

    let shutdown = CancellationToken::new();
    let sweeper = spawn_cache_sweeper(
        Arc::clone(&service),
        cfg.cache_sweep_interval(),
        shutdown.child_token(),
    );
    let (dashboard, auto_refresh) = orchestrator.spawn_auto_refresh(
        ViewQuery::CurrentDay,
        cfg.auto_refresh_interval(),
        shutdown.child_token(),
    );

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(AppState {
        orchestrator,
        dashboard,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down background tasks");
    shutdown.cancel();
    let (sweeper, auto_refresh) = tokio::join!(sweeper, auto_refresh);
    report_task_exit("cache sweeper", sweeper);
    report_task_exit("dashboard auto-refresh", auto_refresh);

    if let Some(path) = &cfg.cache_snapshot_path {
        let saved = cache.save_snapshot(path).await?;
        tracing::info!("Saved {} cache entries to {:?}", saved, path);
    }

    Ok(())
}

// ---

/// Build the reading store selected by `STORE_BACKEND`.
async fn connect_store(cfg: &Config) -> Result<Arc<dyn ReadingStore>> {
    // ---
    match &cfg.backend {
        StoreBackend::Postgres {
            db_url,
            db_pool_max,
        } => {
            tracing::info!("Attempting to connect to database");

            let pool = PgPoolOptions::new()
                .max_connections(*db_pool_max)
                .connect(db_url)
                .await
                .context("Failed to connect to database")?;

            tracing::info!("Successfully connected to database");

            schema::create_schema(&pool).await?;
            Ok(Arc::new(PgReadingStore::new(pool)))
        }
        StoreBackend::Http { api_url, api_token } => {
            Ok(Arc::new(HttpReadingStore::new(api_url, api_token.clone())))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory reading store; data is not persisted");
            Ok(Arc::new(MemoryStore::new(cfg.timezone)))
        }
    }
}

/// Log a background task that ended abnormally. Returns `false` in that case.
fn report_task_exit(name: &str, result: Result<(), JoinError>) -> bool {
    // ---
    match result {
        Ok(()) => true,
        Err(e) if e.is_panic() => {
            tracing::error!("Background task '{}' panicked: {}", name, e);
            false
        }
        Err(e) => {
            tracing::error!("Background task '{}' did not finish: {}", name, e);
            false
        }
    }
}

async fn shutdown_signal() {
    // ---
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `AQUASENSE_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `AQUASENSE_LOG_LEVEL` env var
///
/// Called once at startup before any logging macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("AQUASENSE_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to AQUASENSE_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("AQUASENSE_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,hyper=info,reqwest=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[tokio::test]
    async fn test_report_task_exit_flags_panics() {
        // ---
        let clean = tokio::spawn(async {}).await;
        let panicked = tokio::spawn(async { panic!("sweeper blew up") }).await;

        assert!(report_task_exit("clean", clean));
        assert!(!report_task_exit("panicked", panicked));
    }
}
