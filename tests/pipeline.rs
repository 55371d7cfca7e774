//! End-to-end pipeline scenarios: normalization → aggregation → detection →
//! batching. Time-dependent behavior is driven through explicit timestamps.

use chrono::{DateTime, Duration, Utc};
use spreadwatch_backend::aggregator::PriceAggregator;
use spreadwatch_backend::arbitrage::{ArbitrageDetector, DetectorConfig};
use spreadwatch_backend::broadcast::Broadcaster;
use spreadwatch_backend::gateway::SubscriptionFilter;
use spreadwatch_backend::models::{Quote, VenueId, WsServerEvent};
use spreadwatch_backend::symbols::normalize;

fn detector_config() -> DetectorConfig {
    DetectorConfig {
        min_spread_pct: 0.1,
        max_realistic_spread_pct: 5.0,
        max_price_age_ms: 2_000,
        cooldown_ms: 1_000,
        history_ttl_ms: 60_000,
        allow_synthetic: false,
    }
}

fn quote(venue: VenueId, symbol: &str, bid: f64, ask: f64, at: DateTime<Utc>) -> Quote {
    Quote {
        venue,
        symbol: symbol.to_string(),
        bid,
        ask,
        observed_at: at,
        synthetic: false,
    }
}

/// Scenario: a clean two-venue cross emits exactly one opportunity with the
/// buy on the cheap ask and the sell on the rich bid.
#[test]
fn simple_cross_emits_one_opportunity() {
    let aggregator = PriceAggregator::new(2_000);
    let detector = ArbitrageDetector::new(detector_config());
    let t0 = Utc::now();

    let view = aggregator.ingest_at(quote(VenueId::Hyperliquid, "BTC-USD", 100.0, 101.0, t0), t0);
    assert!(detector.evaluate_at(&view, t0).is_none());

    let t1 = t0 + Duration::milliseconds(10);
    let view = aggregator.ingest_at(quote(VenueId::Paradex, "BTC-USD", 103.0, 104.0, t1), t1);
    let opp = detector.evaluate_at(&view, t1).expect("one opportunity");

    assert_eq!(opp.buy_venue, VenueId::Hyperliquid);
    assert_eq!(opp.sell_venue, VenueId::Paradex);
    assert!((opp.buy_price - 101.0).abs() < 1e-9);
    assert!((opp.sell_price - 103.0).abs() < 1e-9);
    assert!((opp.spread_pct - 1.9802).abs() < 1e-3);
    assert_ne!(opp.buy_venue, opp.sell_venue);
    assert!(opp.sell_price > opp.buy_price);

    // The same views produce nothing new without fresh input.
    assert!(detector.evaluate_at(&view, t1).is_none());
}

/// Scenario: a malformed single-venue book (bid above ask) is not an
/// opportunity — there is only one venue.
#[test]
fn single_venue_crossed_book_is_ignored() {
    let aggregator = PriceAggregator::new(2_000);
    let detector = ArbitrageDetector::new(detector_config());
    let t0 = Utc::now();

    let view = aggregator.ingest_at(quote(VenueId::Hyperliquid, "ETH-USD", 2000.0, 1999.0, t0), t0);
    assert_eq!(view.quotes.len(), 1);
    assert!(detector.evaluate_at(&view, t0).is_none());
}

/// Scenario: the per-key cooldown suppresses a second emission at t+100ms and
/// allows one at t+1010ms.
#[test]
fn cooldown_gates_repeat_emissions() {
    let aggregator = PriceAggregator::new(2_000);
    let detector = ArbitrageDetector::new(detector_config());
    let t0 = Utc::now();

    aggregator.ingest_at(quote(VenueId::Hyperliquid, "BTC-USD", 100.0, 101.0, t0), t0);
    let view = aggregator.ingest_at(quote(VenueId::Paradex, "BTC-USD", 103.0, 104.0, t0), t0);
    let first = detector.evaluate_at(&view, t0).expect("first opportunity");

    // Spread would be ≈ 3.96% but 100ms < 1000ms cooldown.
    let t1 = t0 + Duration::milliseconds(100);
    aggregator.ingest_at(quote(VenueId::Hyperliquid, "BTC-USD", 100.0, 101.0, t1), t1);
    let view = aggregator.ingest_at(quote(VenueId::Paradex, "BTC-USD", 105.0, 106.0, t1), t1);
    assert!(detector.evaluate_at(&view, t1).is_none());

    let t2 = t0 + Duration::milliseconds(1_010);
    aggregator.ingest_at(quote(VenueId::Hyperliquid, "BTC-USD", 100.0, 101.0, t2), t2);
    let view = aggregator.ingest_at(quote(VenueId::Paradex, "BTC-USD", 105.0, 106.0, t2), t2);
    let second = detector.evaluate_at(&view, t2).expect("post-cooldown opportunity");

    // Cooldown invariant: emissions for one key are at least cooldown apart.
    let gap = (second.detected_at - first.detected_at).num_milliseconds();
    assert!(gap >= 1_000, "gap {gap}ms below cooldown");
}

/// Scenario: at t=2500 the venueA quote from t=0 has fallen out of the
/// aggregation window, so only venueB remains and nothing can cross.
#[test]
fn staleness_rejects_candidate() {
    let aggregator = PriceAggregator::new(2_000);
    let detector = ArbitrageDetector::new(detector_config());
    let t0 = Utc::now();

    aggregator.ingest_at(quote(VenueId::Hyperliquid, "SOL-USD", 100.0, 101.0, t0), t0);

    let t1 = t0 + Duration::milliseconds(2_500);
    let view = aggregator.ingest_at(quote(VenueId::Paradex, "SOL-USD", 110.0, 111.0, t1), t1);

    assert_eq!(view.quotes.len(), 1);
    assert_eq!(view.quotes[0].venue, VenueId::Paradex);
    assert!(detector.evaluate_at(&view, t1).is_none());
}

/// Scenario: a raw spread beyond the realistic bound is suppressed as a
/// suspected bad quote.
#[test]
fn sanity_bound_suppresses_unrealistic_spread() {
    let aggregator = PriceAggregator::new(2_000);
    let detector = ArbitrageDetector::new(detector_config());
    let t0 = Utc::now();

    aggregator.ingest_at(quote(VenueId::Hyperliquid, "X-USD", 100.0, 101.0, t0), t0);
    let view = aggregator.ingest_at(quote(VenueId::Paradex, "X-USD", 108.0, 109.0, t0), t0);

    // ≈ 6.9% > 5%.
    assert!(detector.evaluate_at(&view, t0).is_none());
    let stats = detector.stats();
    assert_eq!(stats.suppressed_sanity, 1);
    assert_eq!(stats.opportunities_detected, 0);
}

/// Scenario: five quotes inside one broadcast interval coalesce into a single
/// price frame for an unfiltered subscriber.
#[test]
fn batch_coalescing_delivers_one_frame() {
    let broadcaster = Broadcaster::new(10_000);
    let mut rx = broadcaster.subscribe();
    let filter = SubscriptionFilter::default();
    let t0 = Utc::now();

    for i in 0..5 {
        let at = t0 + Duration::milliseconds(i * 10);
        broadcaster.push_quote(&quote(VenueId::Hyperliquid, "BTC-USD", 100.0 + i as f64, 101.0 + i as f64, at));
    }

    // The interval tick flushes once; the buffer is then empty.
    assert_eq!(broadcaster.flush(), 5);
    assert_eq!(broadcaster.flush(), 0);

    let event = rx.try_recv().expect("one frame");
    let delivered = filter.apply(&event).expect("unfiltered subscriber gets the frame");
    match delivered {
        WsServerEvent::PriceBatch(batch) => assert_eq!(batch.len(), 5),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(rx.try_recv().is_err(), "exactly one frame");
}

/// Invariant: every quote in a returned view is inside the freshness window,
/// and the best sides are the max bid / min ask of the view.
#[test]
fn view_invariants_hold() {
    let aggregator = PriceAggregator::new(2_000);
    let t0 = Utc::now();

    aggregator.ingest_at(quote(VenueId::Hyperliquid, "BTC-USD", 100.0, 101.5, t0), t0);
    aggregator.ingest_at(
        quote(VenueId::Paradex, "BTC-USD", 100.5, 101.0, t0 - Duration::milliseconds(1_500)),
        t0,
    );
    aggregator.ingest_at(
        quote(VenueId::Drift, "BTC-USD", 99.0, 102.0, t0 - Duration::milliseconds(3_000)),
        t0,
    );

    let view = aggregator.aggregate_at("BTC-USD", t0);
    for q in &view.quotes {
        assert!((view.computed_at - q.observed_at).num_milliseconds() <= 2_000);
    }
    let max_bid = view.quotes.iter().map(|q| q.bid).fold(f64::MIN, f64::max);
    let min_ask = view.quotes.iter().map(|q| q.ask).fold(f64::MAX, f64::min);
    assert_eq!(view.best_bid.price, max_bid);
    assert_eq!(view.best_ask.price, min_ask);
    assert_eq!(view.best_bid.venue, Some(VenueId::Paradex));
    assert_eq!(view.best_ask.venue, Some(VenueId::Paradex));
}

/// Invariant: normalization is idempotent and collapses the documented
/// suffix variants.
#[test]
fn normalization_invariants_hold() {
    for raw in ["BTC", "BTC-USD", "BTCUSDT", "BTC-USD-PERP"] {
        assert_eq!(normalize(raw), "BTC-USD");
    }
    for raw in ["SOL-PERP", "eth_usdc", "kPEPE", "XBT", "HYPE", "DOGEUSD"] {
        let once = normalize(raw);
        assert_eq!(normalize(&once), once);
    }
}
