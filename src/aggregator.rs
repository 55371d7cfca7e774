//! Per-symbol quote aggregation: a freshness-windowed view of every venue's
//! latest quote plus the cross-venue best bid/ask.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::models::{AggregatedView, Quote, VenueId, VenuePrice};

/// Shared per-symbol quote store. All operations take one short lock over the
/// map; the best-side scan is O(number of venues).
pub struct PriceAggregator {
    max_price_age_ms: i64,
    by_symbol: Mutex<HashMap<String, HashMap<VenueId, Quote>>>,
}

impl PriceAggregator {
    pub fn new(max_price_age_ms: i64) -> Self {
        Self {
            max_price_age_ms,
            by_symbol: Mutex::new(HashMap::new()),
        }
    }

    /// Insert or overwrite the `(venue, symbol)` quote and return the
    /// refreshed view for that symbol.
    pub fn ingest(&self, quote: Quote) -> AggregatedView {
        self.ingest_at(quote, Utc::now())
    }

    pub fn ingest_at(&self, quote: Quote, now: DateTime<Utc>) -> AggregatedView {
        let symbol = quote.symbol.clone();
        let mut map = self.by_symbol.lock();
        map.entry(symbol.clone()).or_default().insert(quote.venue, quote);
        build_view(map.get(&symbol), &symbol, now, self.max_price_age_ms)
    }

    pub fn aggregate(&self, symbol: &str) -> AggregatedView {
        self.aggregate_at(symbol, Utc::now())
    }

    pub fn aggregate_at(&self, symbol: &str, now: DateTime<Utc>) -> AggregatedView {
        let map = self.by_symbol.lock();
        build_view(map.get(symbol), symbol, now, self.max_price_age_ms)
    }

    /// Aggregate every known symbol, sorted for stable output.
    pub fn snapshot(&self) -> Vec<AggregatedView> {
        self.snapshot_at(Utc::now())
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> Vec<AggregatedView> {
        let map = self.by_symbol.lock();
        let mut symbols: Vec<&String> = map.keys().collect();
        symbols.sort();
        symbols
            .into_iter()
            .map(|symbol| build_view(map.get(symbol), symbol, now, self.max_price_age_ms))
            .collect()
    }

    /// Drop quotes past the freshness window; empty symbols are removed
    /// entirely to bound memory. Returns how many quotes were evicted.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        let mut map = self.by_symbol.lock();
        map.retain(|_, venues| {
            venues.retain(|_, quote| {
                let fresh = quote.age_ms(now) <= self.max_price_age_ms;
                if !fresh {
                    removed += 1;
                }
                fresh
            });
            !venues.is_empty()
        });
        if removed > 0 {
            debug!(removed, "aggregator sweep evicted stale quotes");
        }
        removed
    }

    pub fn clear(&self) {
        self.by_symbol.lock().clear();
    }

    pub fn symbol_count(&self) -> usize {
        self.by_symbol.lock().len()
    }
}

fn build_view(
    venues: Option<&HashMap<VenueId, Quote>>,
    symbol: &str,
    now: DateTime<Utc>,
    max_age_ms: i64,
) -> AggregatedView {
    let mut quotes: Vec<Quote> = venues
        .map(|m| {
            m.values()
                .filter(|q| q.age_ms(now) <= max_age_ms)
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    quotes.sort_by_key(|q| q.venue.as_str());

    let mut best_bid = VenuePrice::empty();
    let mut best_ask = VenuePrice::empty();
    let mut bid_src: Option<&Quote> = None;
    let mut ask_src: Option<&Quote> = None;

    for quote in &quotes {
        if better(quote, bid_src, |q| q.bid, true) {
            bid_src = Some(quote);
            best_bid = VenuePrice { venue: Some(quote.venue), price: quote.bid };
        }
        if better(quote, ask_src, |q| q.ask, false) {
            ask_src = Some(quote);
            best_ask = VenuePrice { venue: Some(quote.venue), price: quote.ask };
        }
    }

    AggregatedView {
        symbol: symbol.to_string(),
        quotes,
        best_bid,
        best_ask,
        computed_at: now,
    }
}

/// Is `candidate` strictly better than the incumbent? Ties break by earliest
/// `observed_at`, then lexicographic venue.
fn better(
    candidate: &Quote,
    incumbent: Option<&Quote>,
    side: impl Fn(&Quote) -> f64,
    want_max: bool,
) -> bool {
    let Some(current) = incumbent else { return true };
    let price = side(candidate);
    let current_price = side(current);
    if price != current_price {
        return if want_max { price > current_price } else { price < current_price };
    }
    if candidate.observed_at != current.observed_at {
        return candidate.observed_at < current.observed_at;
    }
    candidate.venue.as_str() < current.venue.as_str()
}
