//! Drift polling adapter: per-market L2 endpoint, one request per symbol
//! with a short stagger between requests to stay under rate limits.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::feeds::session::WarnWindow;
use crate::feeds::{AdapterContext, QuoteFeed, StateReporter, POLL_REQUEST_TIMEOUT, POLL_STAGGER};
use crate::models::{Quote, VenueConnectionState, VenueId};
use crate::symbols::normalize;

const DEFAULT_API_URL: &str = "https://data.api.drift.trade";
const FAILURE_LOG_WINDOW: Duration = Duration::from_secs(60);

pub struct DriftFeed {
    client: reqwest::Client,
}

fn market_for(base: &str) -> String {
    format!("{base}-PERP")
}

#[derive(Debug, Deserialize)]
struct L2Level {
    price: String,
    #[allow(dead_code)]
    size: String,
}

#[derive(Debug, Deserialize)]
struct L2Response {
    bids: Vec<L2Level>,
    asks: Vec<L2Level>,
}

impl DriftFeed {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(POLL_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for DriftFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuoteFeed for DriftFeed {
    fn venue(&self) -> VenueId {
        VenueId::Drift
    }

    async fn run(&self, ctx: AdapterContext) {
        let base_url = ctx
            .settings
            .url_override
            .clone()
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let markets: Vec<String> = ctx.settings.symbols.iter().map(|s| market_for(s)).collect();
        let mut reporter = StateReporter::new(self.venue(), ctx.states.clone());
        let mut failure_window = WarnWindow::new(FAILURE_LOG_WINDOW);
        let mut shutdown = ctx.shutdown.clone();

        reporter
            .transition(VenueConnectionState::Connecting, None)
            .await;
        info!(url = %base_url, markets = markets.len(), "drift polling started");

        let mut ticker = interval(ctx.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if ctx.shutting_down() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let mut any_ok = false;
                    let mut last_error = None;

                    for (i, market) in markets.iter().enumerate() {
                        if ctx.shutting_down() {
                            break;
                        }
                        if i > 0 {
                            sleep(POLL_STAGGER).await;
                        }
                        match self.fetch_market(&base_url, market).await {
                            Ok(Some(quote)) => {
                                any_ok = true;
                                ctx.emit_quote(quote).await;
                            }
                            Ok(None) => {
                                any_ok = true; // reachable, just an empty book
                            }
                            Err(e) => {
                                // One warn per window; the rest stay at debug
                                // so a flapping endpoint cannot flood the log.
                                if failure_window.allow() {
                                    warn!(market = %market, error = %e, "drift request failed");
                                } else {
                                    debug!(market = %market, error = %e, "drift request failed");
                                }
                                last_error = Some(e.to_string());
                            }
                        }
                    }

                    if any_ok {
                        reporter.transition(VenueConnectionState::Open, None).await;
                    } else if !markets.is_empty() {
                        reporter
                            .transition(VenueConnectionState::Degraded, last_error)
                            .await;
                    }
                }
            }
        }

        reporter.transition(VenueConnectionState::Closed, None).await;
    }
}

impl DriftFeed {
    async fn fetch_market(&self, base_url: &str, market: &str) -> anyhow::Result<Option<Quote>> {
        let url = format!("{base_url}/l2?marketName={market}&depth=1");
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("status {}", response.status());
        }
        let body: L2Response = response.json().await?;
        Ok(parse_top(market, &body))
    }
}

fn parse_top(market: &str, body: &L2Response) -> Option<Quote> {
    let bid = body.bids.first()?.price.parse::<f64>().ok()?;
    let ask = body.asks.first()?.price.parse::<f64>().ok()?;
    if bid <= 0.0 || ask <= 0.0 {
        return None;
    }
    Some(Quote {
        venue: VenueId::Drift,
        symbol: normalize(market),
        bid,
        ask,
        observed_at: Utc::now(),
        synthetic: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_top() {
        let body = L2Response {
            bids: vec![L2Level { price: "150.10".to_string(), size: "5".to_string() }],
            asks: vec![L2Level { price: "150.20".to_string(), size: "3".to_string() }],
        };
        let quote = parse_top("SOL-PERP", &body).unwrap();
        assert_eq!(quote.venue, VenueId::Drift);
        assert_eq!(quote.symbol, "SOL-USD");
        assert!((quote.bid - 150.10).abs() < 1e-9);
        assert!((quote.ask - 150.20).abs() < 1e-9);
        assert!(!quote.synthetic);
    }

    #[test]
    fn test_empty_book_yields_none() {
        let body = L2Response { bids: vec![], asks: vec![] };
        assert!(parse_top("SOL-PERP", &body).is_none());

        let one_sided = L2Response {
            bids: vec![L2Level { price: "150.10".to_string(), size: "5".to_string() }],
            asks: vec![],
        };
        assert!(parse_top("SOL-PERP", &one_sided).is_none());
    }

    #[test]
    fn test_bad_price_yields_none() {
        let body = L2Response {
            bids: vec![L2Level { price: "nan?".to_string(), size: "5".to_string() }],
            asks: vec![L2Level { price: "150.20".to_string(), size: "3".to_string() }],
        };
        assert!(parse_top("SOL-PERP", &body).is_none());
    }

    #[test]
    fn test_market_mapping() {
        assert_eq!(market_for("BTC"), "BTC-PERP");
        assert_eq!(normalize(&market_for("BTC")), "BTC-USD");
    }
}
