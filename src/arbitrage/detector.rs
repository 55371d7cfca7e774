//! Cross-venue opportunity detection.
//!
//! A candidate must clear every guard: venue quorum, crossed best, distinct
//! venues, per-side freshness, synthetic-source policy, min/max spread, and
//! the per-key cooldown. Emitted opportunities are kept in a TTL map keyed by
//! `(symbol, buy_venue, sell_venue)` for cooldown enforcement and the recent
//! history surface.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::models::{
    AggregatedView, Config, DetectorConfigUpdate, DetectorStats, Opportunity, Quote, VenueId,
};

/// Window for the suspected-bad-quote warn, per symbol.
const SANITY_WARN_WINDOW_MS: i64 = 60_000;

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub min_spread_pct: f64,
    pub max_realistic_spread_pct: f64,
    /// Both source quotes must be at most this old at detection time.
    pub max_price_age_ms: i64,
    pub cooldown_ms: i64,
    pub history_ttl_ms: i64,
    /// Whether synthetic (mid-derived) quotes may source an opportunity.
    pub allow_synthetic: bool,
}

impl DetectorConfig {
    pub fn from_app_config(config: &Config) -> Self {
        Self {
            min_spread_pct: config.min_spread_pct,
            max_realistic_spread_pct: config.max_realistic_spread_pct,
            max_price_age_ms: config.max_price_age_ms,
            cooldown_ms: config.arbitrage_cooldown_ms,
            history_ttl_ms: config.arbitrage_max_history_age_ms,
            allow_synthetic: false,
        }
    }
}

type OpportunityKey = (String, VenueId, VenueId);

#[derive(Default)]
struct DetectorState {
    history: HashMap<OpportunityKey, Opportunity>,
    sanity_warned: HashMap<String, DateTime<Utc>>,
    stats: DetectorStats,
}

pub struct ArbitrageDetector {
    config: RwLock<DetectorConfig>,
    state: Mutex<DetectorState>,
}

impl ArbitrageDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config: RwLock::new(config),
            state: Mutex::new(DetectorState::default()),
        }
    }

    /// Evaluate one aggregated view; `Some` only when every guard passes.
    pub fn evaluate(&self, view: &AggregatedView) -> Option<Opportunity> {
        self.evaluate_at(view, Utc::now())
    }

    pub fn evaluate_at(&self, view: &AggregatedView, now: DateTime<Utc>) -> Option<Opportunity> {
        if view.quotes.len() < 2 {
            return None;
        }

        let sell_venue = view.best_bid.venue?;
        let buy_venue = view.best_ask.venue?;
        let sell_price = view.best_bid.price;
        let buy_price = view.best_ask.price;

        if sell_price <= buy_price || sell_venue == buy_venue {
            return None;
        }

        let config = self.config.read().clone();
        let bid_src = source_quote(view, sell_venue)?;
        let ask_src = source_quote(view, buy_venue)?;

        if bid_src.age_ms(now) > config.max_price_age_ms
            || ask_src.age_ms(now) > config.max_price_age_ms
        {
            let mut state = self.state.lock();
            state.stats.suppressed_stale += 1;
            debug!(
                symbol = %view.symbol,
                sell_venue = %sell_venue,
                buy_venue = %buy_venue,
                "skipping candidate with stale side"
            );
            return None;
        }

        if !config.allow_synthetic && (bid_src.synthetic || ask_src.synthetic) {
            debug!(symbol = %view.symbol, "skipping candidate sourced from synthetic quote");
            return None;
        }

        let spread_pct = (sell_price - buy_price) / buy_price * 100.0;
        if spread_pct < config.min_spread_pct {
            return None;
        }

        if spread_pct > config.max_realistic_spread_pct {
            let mut state = self.state.lock();
            state.stats.suppressed_sanity += 1;
            let should_warn = state
                .sanity_warned
                .get(&view.symbol)
                .map(|last| (now - *last).num_milliseconds() >= SANITY_WARN_WINDOW_MS)
                .unwrap_or(true);
            if should_warn {
                state.sanity_warned.insert(view.symbol.clone(), now);
                warn!(
                    symbol = %view.symbol,
                    spread_pct,
                    max = config.max_realistic_spread_pct,
                    "spread beyond realistic bound, suspected bad quote"
                );
            }
            return None;
        }

        let key: OpportunityKey = (view.symbol.clone(), buy_venue, sell_venue);
        let mut state = self.state.lock();
        if let Some(prev) = state.history.get(&key) {
            if (now - prev.detected_at).num_milliseconds() < config.cooldown_ms {
                state.stats.suppressed_cooldown += 1;
                return None;
            }
        }

        let opportunity = Opportunity {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: view.symbol.clone(),
            buy_venue,
            sell_venue,
            buy_price,
            sell_price,
            spread_pct,
            potential_profit: sell_price - buy_price,
            detected_at: now,
        };
        state.history.insert(key, opportunity.clone());
        state.stats.opportunities_detected += 1;

        info!(
            symbol = %opportunity.symbol,
            buy_venue = %opportunity.buy_venue,
            sell_venue = %opportunity.sell_venue,
            spread_pct = opportunity.spread_pct,
            "arbitrage opportunity detected"
        );

        Some(opportunity)
    }

    /// Drop history entries past the TTL. Run on a coarse cadence.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.config.read().history_ttl_ms;
        let mut state = self.state.lock();
        let before = state.history.len();
        state
            .history
            .retain(|_, opp| (now - opp.detected_at).num_milliseconds() <= ttl);
        state
            .sanity_warned
            .retain(|_, last| now - *last <= Duration::milliseconds(SANITY_WARN_WINDOW_MS));
        before - state.history.len()
    }

    /// Most recent opportunities, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Opportunity> {
        let state = self.state.lock();
        let mut opportunities: Vec<Opportunity> = state.history.values().cloned().collect();
        opportunities.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        opportunities.truncate(limit);
        opportunities
    }

    /// Atomically replace threshold values from a partial update.
    pub fn update_config(&self, update: DetectorConfigUpdate) {
        let mut config = self.config.write();
        if let Some(min_spread) = update.min_spread {
            config.min_spread_pct = min_spread;
        }
        if let Some(max_spread) = update.max_realistic_spread {
            config.max_realistic_spread_pct = max_spread;
        }
        info!(
            min_spread_pct = config.min_spread_pct,
            max_realistic_spread_pct = config.max_realistic_spread_pct,
            "detector thresholds updated"
        );
    }

    pub fn stats(&self) -> DetectorStats {
        self.state.lock().stats
    }
}

fn source_quote(view: &AggregatedView, venue: VenueId) -> Option<&Quote> {
    view.quotes.iter().find(|q| q.venue == venue)
}
