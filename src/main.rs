//! Spreadwatch - Cross-Venue Perp Arbitrage Monitor
//!
//! Wires the pipeline together: venue adapter pool → aggregator → detector →
//! broadcaster → gateway, plus the periodic sweep/flush schedulers and the
//! HTTP server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spreadwatch_backend::aggregator::PriceAggregator;
use spreadwatch_backend::api::{self, AppState};
use spreadwatch_backend::arbitrage::{ArbitrageDetector, DetectorConfig};
use spreadwatch_backend::broadcast::Broadcaster;
use spreadwatch_backend::feeds::{FeedPool, VenueHealth};
use spreadwatch_backend::models::{Config, DetectorStats, Quote, VenueStateEvent};

const DETECTOR_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const STATS_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    // Config failures are the only fatal errors: exit before serving clients.
    let config = Config::from_env().context("failed to load configuration")?;

    info!(
        port = config.listen_port,
        venues = ?config.enabled_venues(),
        symbols = ?config.symbols,
        "🚀 spreadwatch starting"
    );

    let aggregator = Arc::new(PriceAggregator::new(config.max_price_age_ms));
    let detector = Arc::new(ArbitrageDetector::new(DetectorConfig::from_app_config(&config)));
    let broadcaster = Arc::new(Broadcaster::new(config.broadcast_max_batch));
    let health = VenueHealth::default();

    let (pool, quote_rx, state_rx) = FeedPool::start(&config);

    let mut workers = Vec::new();
    workers.push(tokio::spawn(run_pipeline(
        quote_rx,
        aggregator.clone(),
        detector.clone(),
        broadcaster.clone(),
    )));
    workers.push(tokio::spawn(forward_venue_states(
        state_rx,
        health.clone(),
        broadcaster.clone(),
    )));
    workers.push(tokio::spawn(run_flush_scheduler(
        broadcaster.clone(),
        Duration::from_millis(config.broadcast_interval_ms),
    )));
    workers.push(tokio::spawn(run_aggregator_sweeper(
        aggregator.clone(),
        Duration::from_millis(config.cleanup_interval_prices_ms),
    )));
    workers.push(tokio::spawn(run_detector_sweeper(detector.clone())));
    workers.push(tokio::spawn(run_stats_publisher(
        detector.clone(),
        broadcaster.clone(),
    )));

    let state = AppState {
        aggregator,
        detector,
        broadcaster,
        health,
    };

    let cors = match &config.cors_origin {
        Some(origin) => {
            let origin: HeaderValue = origin
                .parse()
                .with_context(|| format!("invalid CLIENT_CORS_ORIGIN: {origin:?}"))?;
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::permissive(),
    };

    let app = api::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.listen_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutting down");
    pool.stop().await;
    for worker in &workers {
        worker.abort();
    }
    info!("shutdown complete");

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spreadwatch_backend=debug,spreadwatch=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }
}

/// Core pipeline: each inbound quote feeds the broadcaster's pending buffer,
/// refreshes the aggregated view, and runs one detector pass.
async fn run_pipeline(
    mut quote_rx: mpsc::Receiver<Quote>,
    aggregator: Arc<PriceAggregator>,
    detector: Arc<ArbitrageDetector>,
    broadcaster: Arc<Broadcaster>,
) {
    while let Some(quote) = quote_rx.recv().await {
        broadcaster.push_quote(&quote);
        let view = aggregator.ingest(quote);
        if let Some(opportunity) = detector.evaluate(&view) {
            broadcaster.send_opportunity(opportunity);
        }
    }
    debug!("quote intake closed, pipeline stopped");
}

async fn forward_venue_states(
    mut state_rx: mpsc::Receiver<VenueStateEvent>,
    health: VenueHealth,
    broadcaster: Arc<Broadcaster>,
) {
    while let Some(event) = state_rx.recv().await {
        health.record(&event);
        broadcaster.send_state(&event);
    }
}

async fn run_flush_scheduler(broadcaster: Arc<Broadcaster>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        broadcaster.flush();
    }
}

async fn run_aggregator_sweeper(aggregator: Arc<PriceAggregator>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        aggregator.sweep();
    }
}

async fn run_detector_sweeper(detector: Arc<ArbitrageDetector>) {
    let mut ticker = interval(DETECTOR_SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        detector.sweep();
    }
}

/// Publishes detector counters when they change and someone is listening.
async fn run_stats_publisher(detector: Arc<ArbitrageDetector>, broadcaster: Arc<Broadcaster>) {
    let mut ticker = interval(STATS_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last: Option<DetectorStats> = None;
    loop {
        ticker.tick().await;
        let stats = detector.stats();
        if last == Some(stats) || broadcaster.receiver_count() == 0 {
            continue;
        }
        last = Some(stats);
        broadcaster.send_stats(stats);
    }
}
