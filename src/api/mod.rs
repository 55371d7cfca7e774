//! HTTP surface: shared server state, the REST snapshot routes, and the
//! websocket gateway mount.

pub mod routes;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::aggregator::PriceAggregator;
use crate::arbitrage::ArbitrageDetector;
use crate::broadcast::Broadcaster;
use crate::feeds::VenueHealth;

/// Shared handles for the REST routes and the gateway.
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<PriceAggregator>,
    pub detector: Arc<ArbitrageDetector>,
    pub broadcaster: Arc<Broadcaster>,
    pub health: VenueHealth,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/opportunities", get(routes::get_opportunities))
        .route("/api/prices", get(routes::get_prices))
        .route("/api/venues", get(routes::get_venues))
        .route("/api/stats", get(routes::get_stats))
        .route("/ws", get(crate::gateway::websocket_handler))
        .with_state(state)
}
