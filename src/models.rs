//! Shared value types: quotes, aggregated views, opportunities, wire events,
//! and the env-driven application configuration.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Venue identity. The set is fixed at process start; per-venue enable flags
/// and URL overrides come from [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueId {
    Hyperliquid,
    Paradex,
    Backpack,
    Drift,
    Lighter,
}

impl VenueId {
    pub const ALL: [VenueId; 5] = [
        VenueId::Hyperliquid,
        VenueId::Paradex,
        VenueId::Backpack,
        VenueId::Drift,
        VenueId::Lighter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VenueId::Hyperliquid => "hyperliquid",
            VenueId::Paradex => "paradex",
            VenueId::Backpack => "backpack",
            VenueId::Drift => "drift",
            VenueId::Lighter => "lighter",
        }
    }

    pub fn parse(s: &str) -> Option<VenueId> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hyperliquid" => Some(VenueId::Hyperliquid),
            "paradex" => Some(VenueId::Paradex),
            "backpack" => Some(VenueId::Backpack),
            "drift" => Some(VenueId::Drift),
            "lighter" => Some(VenueId::Lighter),
            _ => None,
        }
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single top-of-book observation from one venue.
///
/// `observed_at` is stamped when the adapter parses the venue message.
/// `synthetic` marks quotes fabricated around a venue-reported mid; they feed
/// price updates and aggregation but never source an opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub venue: VenueId,
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub synthetic: bool,
}

impl Quote {
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.observed_at).num_milliseconds()
    }

    /// Venue-local spread: `(ask - bid) / bid * 100`.
    pub fn local_spread_pct(&self) -> f64 {
        if self.bid <= 0.0 {
            return 0.0;
        }
        (self.ask - self.bid) / self.bid * 100.0
    }
}

/// One side of an aggregated view. `venue` is `None` when no fresh quote
/// exists, with `price` pinned to 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VenuePrice {
    pub venue: Option<VenueId>,
    pub price: f64,
}

impl VenuePrice {
    pub fn empty() -> Self {
        Self { venue: None, price: 0.0 }
    }
}

/// Per-symbol cross-venue view: every fresh quote plus the best bid/ask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedView {
    pub symbol: String,
    pub quotes: Vec<Quote>,
    pub best_bid: VenuePrice,
    pub best_ask: VenuePrice,
    pub computed_at: DateTime<Utc>,
}

/// A cross-venue pricing condition that passed every detector guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub symbol: String,
    pub buy_venue: VenueId,
    pub sell_venue: VenueId,
    pub buy_price: f64,
    pub sell_price: f64,
    pub spread_pct: f64,
    pub potential_profit: f64,
    pub detected_at: DateTime<Utc>,
}

/// Venue connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueConnectionState {
    Connecting,
    Open,
    Degraded,
    Closed,
}

impl fmt::Display for VenueConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Degraded => write!(f, "degraded"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// A connection-state transition published by an adapter.
#[derive(Debug, Clone, Serialize)]
pub struct VenueStateEvent {
    pub venue: VenueId,
    pub state: VenueConnectionState,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// Wire-shape price record: one quote plus its precomputed venue-local spread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub exchange: VenueId,
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub spread: f64,
    pub timestamp: i64,
}

impl From<&Quote> for PriceUpdate {
    fn from(q: &Quote) -> Self {
        Self {
            exchange: q.venue,
            symbol: q.symbol.clone(),
            bid: q.bid,
            ask: q.ask,
            spread: q.local_spread_pct(),
            timestamp: q.observed_at.timestamp_millis(),
        }
    }
}

/// Aggregate detector counters, surfaced as `arbitrage:stats` and `/api/stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectorStats {
    pub opportunities_detected: u64,
    pub suppressed_cooldown: u64,
    pub suppressed_stale: u64,
    pub suppressed_sanity: u64,
}

/// Partial detector reconfiguration, as received from `config:update`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct DetectorConfigUpdate {
    #[serde(rename = "minSpread")]
    pub min_spread: Option<f64>,
    #[serde(rename = "maxRealisticSpread")]
    pub max_realistic_spread: Option<f64>,
}

/// Server → client events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum WsServerEvent {
    #[serde(rename = "price:update")]
    PriceBatch(Vec<PriceUpdate>),
    #[serde(rename = "arbitrage:opportunity")]
    Opportunity(Opportunity),
    #[serde(rename = "arbitrage:stats")]
    Stats(DetectorStats),
    #[serde(rename = "exchange:connected")]
    ExchangeConnected { exchange: VenueId },
    #[serde(rename = "exchange:disconnected")]
    ExchangeDisconnected { exchange: VenueId },
    #[serde(rename = "exchange:error")]
    ExchangeError { exchange: VenueId, error: String },
}

/// Client → server events.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum WsClientEvent {
    #[serde(rename = "subscribe:symbols")]
    SubscribeSymbols(Vec<String>),
    #[serde(rename = "unsubscribe:symbols")]
    UnsubscribeSymbols(Vec<String>),
    #[serde(rename = "subscribe:exchanges")]
    SubscribeExchanges(Vec<String>),
    #[serde(rename = "config:update")]
    ConfigUpdate(DetectorConfigUpdate),
}

/// Per-venue startup settings.
#[derive(Debug, Clone)]
pub struct VenueConfig {
    pub enabled: bool,
    pub url_override: Option<String>,
}

/// Application configuration, read once at startup. Missing vars fall back to
/// defaults; present-but-invalid numbers are fatal.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_port: u16,
    pub cors_origin: Option<String>,
    /// Canonical deployment symbol list (uppercase bases, e.g. "BTC").
    pub symbols: Vec<String>,
    pub max_price_age_ms: i64,
    pub arbitrage_cooldown_ms: i64,
    pub arbitrage_max_history_age_ms: i64,
    pub cleanup_interval_prices_ms: u64,
    pub broadcast_interval_ms: u64,
    pub broadcast_max_batch: usize,
    pub watchdog_interval_ms: u64,
    pub max_reconnect_attempts: u32,
    pub poll_interval_ms: u64,
    pub min_spread_pct: f64,
    pub max_realistic_spread_pct: f64,
    pub venues: HashMap<VenueId, VenueConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut venues = HashMap::new();
        for venue in VenueId::ALL {
            let upper = venue.as_str().to_ascii_uppercase();
            let enabled = env_flag(&format!("{upper}_ENABLED"), true);
            let url_override = env::var(format!("{upper}_URL"))
                .ok()
                .filter(|v| !v.trim().is_empty());
            venues.insert(venue, VenueConfig { enabled, url_override });
        }

        let symbols = env::var("SYMBOLS")
            .unwrap_or_else(|_| "BTC,ETH,SOL".to_string())
            .split(',')
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        if symbols.is_empty() {
            bail!("SYMBOLS resolved to an empty list");
        }

        Ok(Self {
            listen_port: env_parse("LISTEN_PORT", 3001)?,
            cors_origin: env::var("CLIENT_CORS_ORIGIN").ok().filter(|v| !v.trim().is_empty()),
            symbols,
            max_price_age_ms: env_parse("MAX_PRICE_AGE_MS", 2_000)?,
            arbitrage_cooldown_ms: env_parse("ARBITRAGE_COOLDOWN_MS", 1_000)?,
            arbitrage_max_history_age_ms: env_parse("ARBITRAGE_MAX_HISTORY_AGE_MS", 60_000)?,
            cleanup_interval_prices_ms: env_parse("CLEANUP_INTERVAL_PRICES_MS", 1_000)?,
            broadcast_interval_ms: env_parse("BROADCAST_INTERVAL_MS", 100)?,
            broadcast_max_batch: env_parse("BROADCAST_MAX_BATCH", 10_000)?,
            watchdog_interval_ms: env_parse("WATCHDOG_INTERVAL_MS", 15_000)?,
            max_reconnect_attempts: env_parse("MAX_RECONNECT_ATTEMPTS", 10)?,
            poll_interval_ms: env_parse("POLL_INTERVAL_MS", 1_000)?,
            min_spread_pct: env_parse("MIN_SPREAD_PCT", 0.1)?,
            max_realistic_spread_pct: env_parse("MAX_REALISTIC_SPREAD_PCT", 5.0)?,
            venues,
        })
    }

    pub fn venue(&self, venue: VenueId) -> &VenueConfig {
        // All venues are populated in from_env.
        &self.venues[&venue]
    }

    pub fn enabled_venues(&self) -> Vec<VenueId> {
        VenueId::ALL
            .into_iter()
            .filter(|v| self.venues.get(v).map(|c| c.enabled).unwrap_or(false))
            .collect()
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}
