//! Lighter polling adapter: one batch order-book-details request per cycle.
//!
//! Lighter only exposes a mid price, so the adapter synthesizes a symmetric
//! bid/ask one basis point either side of the mid. Synthetic quotes feed
//! price updates and aggregation but are excluded from opportunity sourcing
//! by the detector.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::feeds::session::WarnWindow;
use crate::feeds::{AdapterContext, QuoteFeed, StateReporter, POLL_REQUEST_TIMEOUT};
use crate::models::{Quote, VenueConnectionState, VenueId};
use crate::symbols::normalize;

const DEFAULT_API_URL: &str = "https://mainnet.zklighter.elliot.ai";
const FAILURE_LOG_WINDOW: Duration = Duration::from_secs(60);

/// Half-spread applied around the venue mid (1 bp).
const SYNTHETIC_HALF_SPREAD: f64 = 0.0001;

pub struct LighterFeed {
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct OrderBookDetail {
    symbol: String,
    mid_price: String,
}

#[derive(Debug, Deserialize)]
struct OrderBookDetailsResponse {
    order_book_details: Vec<OrderBookDetail>,
}

impl LighterFeed {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(POLL_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for LighterFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuoteFeed for LighterFeed {
    fn venue(&self) -> VenueId {
        VenueId::Lighter
    }

    async fn run(&self, ctx: AdapterContext) {
        let base_url = ctx
            .settings
            .url_override
            .clone()
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let wanted: HashSet<String> = ctx.settings.symbols.iter().map(|s| normalize(s)).collect();
        let mut reporter = StateReporter::new(self.venue(), ctx.states.clone());
        let mut failure_window = WarnWindow::new(FAILURE_LOG_WINDOW);
        let mut shutdown = ctx.shutdown.clone();

        reporter
            .transition(VenueConnectionState::Connecting, None)
            .await;
        info!(url = %base_url, symbols = wanted.len(), "lighter polling started");

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
                    match self.fetch_batch(&base_url).await {
                        Ok(details) => {
                            reporter.transition(VenueConnectionState::Open, None).await;
                            for detail in &details {
                                if let Some(quote) = synthesize(detail, &wanted) {
                                    ctx.emit_quote(quote).await;
                                }
                            }
                        }
                        Err(e) => {
                            if failure_window.allow() {
                                warn!(error = %e, "lighter batch request failed");
                            } else {
                                debug!(error = %e, "lighter batch request failed");
                            }
                            reporter
                                .transition(VenueConnectionState::Degraded, Some(e.to_string()))
                                .await;
                        }
                    }
                }
            }
        }

        reporter.transition(VenueConnectionState::Closed, None).await;
    }
}

impl LighterFeed {
    async fn fetch_batch(&self, base_url: &str) -> anyhow::Result<Vec<OrderBookDetail>> {
        let url = format!("{base_url}/api/v1/orderBookDetails");
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("status {}", response.status());
        }
        let body: OrderBookDetailsResponse = response.json().await?;
        Ok(body.order_book_details)
    }
}

/// Build a synthetic quote around the venue mid, if the symbol is wanted and
/// the mid parses to a positive price.
fn synthesize(detail: &OrderBookDetail, wanted: &HashSet<String>) -> Option<Quote> {
    let symbol = normalize(&detail.symbol);
    if !wanted.contains(&symbol) {
        return None;
    }
    let mid = detail.mid_price.parse::<f64>().ok()?;
    if mid <= 0.0 {
        return None;
    }
    Some(Quote {
        venue: VenueId::Lighter,
        symbol,
        bid: mid * (1.0 - SYNTHETIC_HALF_SPREAD),
        ask: mid * (1.0 + SYNTHETIC_HALF_SPREAD),
        observed_at: Utc::now(),
        synthetic: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wanted() -> HashSet<String> {
        ["BTC", "ETH"].iter().map(|s| normalize(s)).collect()
    }

    #[test]
    fn test_synthesize_symmetric() {
        let detail = OrderBookDetail {
            symbol: "BTC".to_string(),
            mid_price: "50000".to_string(),
        };
        let quote = synthesize(&detail, &wanted()).unwrap();
        assert_eq!(quote.venue, VenueId::Lighter);
        assert_eq!(quote.symbol, "BTC-USD");
        assert!(quote.synthetic);
        assert!((quote.bid - 49995.0).abs() < 1e-6);
        assert!((quote.ask - 50005.0).abs() < 1e-6);
        // Mid is preserved by the symmetric half-spread.
        assert!(((quote.bid + quote.ask) / 2.0 - 50000.0).abs() < 1e-6);
    }

    #[test]
    fn test_unwanted_symbol_skipped() {
        let detail = OrderBookDetail {
            symbol: "DOGE".to_string(),
            mid_price: "0.1".to_string(),
        };
        assert!(synthesize(&detail, &wanted()).is_none());
    }

    #[test]
    fn test_bad_mid_skipped() {
        for mid in ["", "abc", "0", "-5"] {
            let detail = OrderBookDetail {
                symbol: "BTC".to_string(),
                mid_price: mid.to_string(),
            };
            assert!(synthesize(&detail, &wanted()).is_none(), "mid {mid:?}");
        }
    }
}
