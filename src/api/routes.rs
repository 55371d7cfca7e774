//! REST snapshot endpoints. Everything here reads live in-memory structures;
//! there is no storage behind any of these routes.

use axum::extract::{Query, State};
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::models::{
    AggregatedView, DetectorStats, Opportunity, VenueConnectionState, VenueId,
};

pub async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct OpportunityQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct OpportunitiesResponse {
    pub opportunities: Vec<Opportunity>,
    pub count: usize,
    pub timestamp: String,
}

/// Recent opportunities, newest first.
pub async fn get_opportunities(
    Query(params): Query<OpportunityQuery>,
    State(state): State<AppState>,
) -> Json<OpportunitiesResponse> {
    let limit = params.limit.unwrap_or(50);
    let opportunities = state.detector.recent(limit);
    Json(OpportunitiesResponse {
        count: opportunities.len(),
        opportunities,
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct PricesResponse {
    pub symbols: Vec<AggregatedView>,
    pub count: usize,
    pub timestamp: String,
}

/// Fresh aggregated views for every known symbol.
pub async fn get_prices(State(state): State<AppState>) -> Json<PricesResponse> {
    let symbols = state.aggregator.snapshot();
    Json(PricesResponse {
        count: symbols.len(),
        symbols,
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct VenueStatus {
    pub venue: VenueId,
    pub state: VenueConnectionState,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct VenuesResponse {
    pub venues: Vec<VenueStatus>,
}

/// Last known connection state per venue.
pub async fn get_venues(State(state): State<AppState>) -> Json<VenuesResponse> {
    let venues = state
        .health
        .snapshot()
        .into_iter()
        .map(|e| VenueStatus {
            venue: e.venue,
            state: e.state,
            since: e.at,
        })
        .collect();
    Json(VenuesResponse { venues })
}

pub async fn get_stats(State(state): State<AppState>) -> Json<DetectorStats> {
    Json(state.detector.stats())
}
