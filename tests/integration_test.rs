use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use aquasense_history::routes::{self, AppState};
use aquasense_history::{
    CacheStore, FetchOrchestrator, FetchPolicy, HistoricalDataService, ManualClock, MemoryStore,
    RawReading, ServiceSettings,
};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use chrono_tz::America::New_York;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::sync::watch;

struct TestApp {
    base: String,
    store: Arc<MemoryStore>,
    client: Client,
}

/// Serve the full router on an ephemeral port over a seeded in-memory store.
async fn spawn_app() -> Result<TestApp> {
    // ---
    let store = Arc::new(MemoryStore::new(New_York));
    for (day, hour, ph) in [(14, 8, 7.0), (14, 9, 7.4), (15, 10, 6.8)] {
        let at = New_York
            .with_ymd_and_hms(2025, 1, day, hour, 15, 0)
            .unwrap()
            .with_timezone(&Utc);
        store.insert(
            "sensor_readings",
            RawReading::new()
                .with("timestamp", at.to_rfc3339())
                .with("pH", ph),
        );
    }

    let now = New_York
        .with_ymd_and_hms(2025, 1, 15, 12, 0, 0)
        .unwrap()
        .with_timezone(&Utc);
    let clock = Arc::new(ManualClock::new(now));
    let cache = Arc::new(CacheStore::new(ChronoDuration::hours(24), clock.clone()));
    let settings = ServiceSettings {
        policy: FetchPolicy {
            timeout: Duration::from_secs(2),
            max_retries: 0,
            backoff_base: Duration::from_millis(1),
        },
        ..ServiceSettings::default()
    };
    let service = Arc::new(HistoricalDataService::new(
        store.clone(),
        cache,
        clock,
        New_York,
        settings,
    ));
    let orchestrator = Arc::new(FetchOrchestrator::new(service, Duration::from_secs(60)));
    let (_tx, dashboard) = watch::channel(None);

    let app = routes::router(AppState {
        orchestrator,
        dashboard,
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Ok(TestApp {
        base: format!("http://{addr}"),
        store,
        client: Client::new(),
    })
}

#[tokio::test]
async fn health_reports_ok() -> Result<()> {
    // ---
    let app = spawn_app().await?;
    let response = app.client.get(format!("{}/health", app.base)).send().await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn aggregated_weekly_returns_daily_buckets() -> Result<()> {
    // ---
    let app = spawn_app().await?;
    let url = format!("{}/readings/aggregated?filter=weekly", app.base);

    let body: Value = app.client.get(&url).send().await?.json().await?;
    assert_eq!(body["status"], "live");
    let buckets = body["data"].as_array().expect("data array");
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0]["bucket_start"], "2025-01-14T00:00:00-05:00");
    assert!((buckets[0]["pH"].as_f64().unwrap() - 7.2).abs() < 1e-9);
    assert!(buckets[0]["turbidity"].is_null());

    let cached: Value = app.client.get(&url).send().await?.json().await?;
    assert_eq!(cached["status"], "cached");
    Ok(())
}

#[tokio::test]
async fn unknown_filter_is_rejected() -> Result<()> {
    // ---
    let app = spawn_app().await?;
    for path in ["readings/aggregated?filter=fortnightly", "readings/range?filter=hourly"] {
        let response = app.client.get(format!("{}/{path}", app.base)).send().await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{path}");
    }
    Ok(())
}

#[tokio::test]
async fn range_reports_local_calendar_bounds() -> Result<()> {
    // ---
    let app = spawn_app().await?;
    let body: Value = app
        .client
        .get(format!("{}/readings/range?filter=monthly", app.base))
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(body["filter"], "monthly");
    assert_eq!(body["start_date"], "2025-01-01");
    assert_eq!(body["end_date"], "2025-01-31");
    assert_eq!(body["start"], "2025-01-01T05:00:00Z");
    Ok(())
}

#[tokio::test]
async fn store_outage_without_cache_is_503() -> Result<()> {
    // ---
    let app = spawn_app().await?;
    app.store.fail_next(1);

    let response = app
        .client
        .get(format!("{}/readings/current-day", app.base))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json().await?;
    assert_eq!(body["status"], "unavailable");
    assert!(body["data"].as_array().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn cache_can_be_cleared_per_filter() -> Result<()> {
    // ---
    let app = spawn_app().await?;
    app.client
        .get(format!("{}/readings/aggregated?filter=weekly", app.base))
        .send()
        .await?
        .error_for_status()?;

    let cleared: Value = app
        .client
        .delete(format!("{}/cache?filter=weekly", app.base))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(cleared["removed"], 1);

    let swept: Value = app
        .client
        .post(format!("{}/cache/sweep", app.base))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(swept["removed"], 0);
    Ok(())
}

#[tokio::test]
async fn repeated_refresh_is_debounced() -> Result<()> {
    // ---
    let app = spawn_app().await?;
    let url = format!("{}/readings/refresh?view=current-day", app.base);

    let first = app.client.post(&url).send().await?;
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.client.post(&url).send().await?;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key("retry-after"));
    Ok(())
}

#[tokio::test]
async fn dashboard_is_loading_before_first_refresh() -> Result<()> {
    // ---
    let app = spawn_app().await?;
    let response = app.client.get(format!("{}/dashboard", app.base)).send().await?;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json().await?;
    assert_eq!(body["status"], "loading");
    Ok(())
}
