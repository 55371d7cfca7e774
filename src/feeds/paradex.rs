//! Paradex streaming adapter: JSON-RPC order-book delta channels.
//!
//! Paradex publishes level-2 diffs, not top-of-book quotes, so the adapter
//! keeps a small per-market tracker over the top levels of each side. A
//! size-zero update (or delete) removes the level and the best is re-derived
//! from the remaining levels; a quote is emitted only while both sides are
//! populated.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::feeds::session::Backoff;
use crate::feeds::{AdapterContext, QuoteFeed, StateReporter, HEARTBEAT_INTERVAL};
use crate::models::{Quote, VenueConnectionState, VenueId};
use crate::symbols::normalize;

const DEFAULT_WS_URL: &str = "wss://ws.api.prod.paradex.trade/v1";

/// Levels tracked per side; enough to survive bursts of top-level removals.
const MAX_TRACKED_LEVELS: usize = 10;

pub struct ParadexFeed;

fn market_for(base: &str) -> String {
    format!("{base}-USD-PERP")
}

/// f64 price usable as an ordered map key.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PriceKey(f64);

impl Eq for PriceKey {}

impl PartialOrd for PriceKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriceKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Minimal two-sided tracker: price → size for the top levels of each side.
#[derive(Debug, Default)]
struct BookTop {
    bids: BTreeMap<PriceKey, f64>,
    asks: BTreeMap<PriceKey, f64>,
    last_seq: Option<u64>,
    last_emitted: Option<(f64, f64)>,
}

impl BookTop {
    fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.last_emitted = None;
    }

    fn apply(&mut self, side: Side, price: f64, size: f64) {
        let book = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        if size <= 0.0 {
            book.remove(&PriceKey(price));
        } else {
            book.insert(PriceKey(price), size);
        }
        // Keep the tracker bounded: best bids are the highest prices, best
        // asks the lowest.
        while self.bids.len() > MAX_TRACKED_LEVELS {
            let Some(&lowest) = self.bids.keys().next() else { break };
            self.bids.remove(&lowest);
        }
        while self.asks.len() > MAX_TRACKED_LEVELS {
            let Some(&highest) = self.asks.keys().next_back() else { break };
            self.asks.remove(&highest);
        }
    }

    fn best(&self) -> Option<(f64, f64)> {
        let bid = self.bids.keys().next_back()?.0;
        let ask = self.asks.keys().next()?.0;
        Some((bid, ask))
    }

    /// Best pair if it changed since the last emission.
    fn best_if_changed(&mut self) -> Option<(f64, f64)> {
        let best = self.best()?;
        if self.last_emitted == Some(best) {
            return None;
        }
        self.last_emitted = Some(best);
        Some(best)
    }
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Deserialize)]
struct LevelMsg {
    side: String,
    price: String,
    size: String,
}

#[derive(Debug, Deserialize)]
struct DeltaMsg {
    market: String,
    seq_no: u64,
    update_type: String,
    #[serde(default)]
    inserts: Vec<LevelMsg>,
    #[serde(default)]
    updates: Vec<LevelMsg>,
    #[serde(default)]
    deletes: Vec<LevelMsg>,
}

#[async_trait]
impl QuoteFeed for ParadexFeed {
    fn venue(&self) -> VenueId {
        VenueId::Paradex
    }

    async fn run(&self, ctx: AdapterContext) {
        let url = ctx
            .settings
            .url_override
            .clone()
            .unwrap_or_else(|| DEFAULT_WS_URL.to_string());
        let mut reporter = StateReporter::new(self.venue(), ctx.states.clone());
        let mut backoff = Backoff::new(ctx.settings.max_reconnect_attempts);
        let mut markets: Vec<String> = ctx.settings.symbols.iter().map(|s| market_for(s)).collect();
        let mut shutdown = ctx.shutdown.clone();

        while !ctx.shutting_down() {
            reporter
                .transition(VenueConnectionState::Connecting, None)
                .await;

            match self
                .session(&ctx, &url, &mut markets, &mut reporter, &mut backoff)
                .await
            {
                Ok(()) => break,
                Err(e) => {
                    debug!(error = %e, "paradex session ended");
                    reporter
                        .transition(VenueConnectionState::Degraded, Some(e.to_string()))
                        .await;
                }
            }

            reporter.transition(VenueConnectionState::Closed, None).await;
            if ctx.shutting_down() {
                break;
            }
            let delay = backoff.next_delay("paradex");
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
        }

        reporter.transition(VenueConnectionState::Closed, None).await;
    }
}

impl ParadexFeed {
    async fn session(
        &self,
        ctx: &AdapterContext,
        url: &str,
        markets: &mut Vec<String>,
        reporter: &mut StateReporter,
        backoff: &mut Backoff,
    ) -> Result<()> {
        let (ws_stream, _) = connect_async(url).await.context("connect")?;
        info!(url, markets = markets.len(), "paradex connected");
        reporter.transition(VenueConnectionState::Open, None).await;
        backoff.reset();

        let (mut write, mut read) = ws_stream.split();

        // Request id → market, so error replies can name the offender.
        let mut pending_subs: HashMap<u64, String> = HashMap::new();
        for (i, market) in markets.iter().enumerate() {
            let id = i as u64 + 1;
            let sub = serde_json::json!({
                "jsonrpc": "2.0",
                "method": "subscribe",
                "params": { "channel": format!("order_book.{market}.deltas") },
                "id": id,
            });
            write
                .send(Message::Text(sub.to_string()))
                .await
                .context("send subscription")?;
            pending_subs.insert(id, market.clone());
        }

        let mut books: HashMap<String, BookTop> = HashMap::new();
        let mut heartbeat = interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shutdown = ctx.shutdown.clone();

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    write
                        .send(Message::Ping(Vec::new()))
                        .await
                        .context("send heartbeat")?;
                }
                _ = shutdown.changed() => {
                    if ctx.shutting_down() {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
                frame = timeout(ctx.settings.watchdog_interval, read.next()) => {
                    let msg = match frame {
                        Err(_) => bail!("watchdog: no inbound frame within {:?}", ctx.settings.watchdog_interval),
                        Ok(None) => bail!("stream ended"),
                        Ok(Some(Err(e))) => bail!("transport error: {e}"),
                        Ok(Some(Ok(msg))) => msg,
                    };
                    match msg {
                        Message::Text(text) => {
                            self.handle_text(ctx, &text, markets, &mut pending_subs, &mut books)
                                .await?;
                        }
                        Message::Ping(payload) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Message::Close(_) => bail!("server closed connection"),
                        _ => {}
                    }
                }
            }
        }
    }

    /// Returns Err only when the book state cannot be trusted any more
    /// (sequence gap) and the session must resync via reconnect.
    async fn handle_text(
        &self,
        ctx: &AdapterContext,
        text: &str,
        markets: &mut Vec<String>,
        pending_subs: &mut HashMap<u64, String>,
        books: &mut HashMap<String, BookTop>,
    ) -> Result<()> {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "paradex: unparseable frame dropped");
                return Ok(());
            }
        };

        // Subscription replies carry an id; data frames do not.
        if let Some(id) = value.get("id").and_then(|i| i.as_u64()) {
            let market = pending_subs.remove(&id);
            if let Some(err) = value.get("error") {
                let detail = err
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("subscription rejected");
                if let Some(market) = market {
                    warn!(market = %market, detail, "paradex rejected subscription, removing market");
                    markets.retain(|m| m != &market);
                    books.remove(&market);
                } else {
                    warn!(detail, "paradex error reply for unknown request");
                }
            }
            return Ok(());
        }

        let Some(data) = value
            .get("params")
            .and_then(|p| p.get("data"))
        else {
            return Ok(());
        };
        let delta: DeltaMsg = match serde_json::from_value(data.clone()) {
            Ok(d) => d,
            Err(e) => {
                debug!(error = %e, "paradex: bad delta payload dropped");
                return Ok(());
            }
        };

        let book = books.entry(delta.market.clone()).or_default();

        match delta.update_type.as_str() {
            "s" => {
                book.clear();
                book.last_seq = Some(delta.seq_no);
            }
            "d" => {
                if let Some(last) = book.last_seq {
                    if delta.seq_no != last + 1 {
                        bail!(
                            "sequence gap on {}: {} -> {}",
                            delta.market,
                            last,
                            delta.seq_no
                        );
                    }
                }
                book.last_seq = Some(delta.seq_no);
            }
            other => {
                debug!(update_type = other, "paradex: unknown update type dropped");
                return Ok(());
            }
        }

        for level in delta
            .inserts
            .iter()
            .chain(delta.updates.iter())
            .chain(delta.deletes.iter())
        {
            let side = match level.side.as_str() {
                "BUY" => Side::Buy,
                "SELL" => Side::Sell,
                _ => continue,
            };
            let (Ok(price), Ok(size)) = (level.price.parse::<f64>(), level.size.parse::<f64>())
            else {
                debug!(market = %delta.market, "paradex: bad level dropped");
                continue;
            };
            if price <= 0.0 {
                continue;
            }
            book.apply(side, price, size);
        }

        if let Some((bid, ask)) = book.best_if_changed() {
            ctx.emit_quote(Quote {
                venue: VenueId::Paradex,
                symbol: normalize(&delta.market),
                bid,
                ask,
                observed_at: Utc::now(),
                synthetic: false,
            })
            .await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_top_basic() {
        let mut book = BookTop::default();
        book.apply(Side::Buy, 100.0, 1.0);
        book.apply(Side::Buy, 99.0, 2.0);
        book.apply(Side::Sell, 101.0, 1.5);
        book.apply(Side::Sell, 102.0, 0.5);
        assert_eq!(book.best(), Some((100.0, 101.0)));
    }

    #[test]
    fn test_best_rederived_on_removal() {
        let mut book = BookTop::default();
        book.apply(Side::Buy, 100.0, 1.0);
        book.apply(Side::Buy, 99.5, 2.0);
        book.apply(Side::Sell, 101.0, 1.0);
        book.apply(Side::Sell, 101.5, 1.0);

        // Size-zero at the current best invalidates it; the next level wins.
        book.apply(Side::Buy, 100.0, 0.0);
        assert_eq!(book.best(), Some((99.5, 101.0)));
        book.apply(Side::Sell, 101.0, 0.0);
        assert_eq!(book.best(), Some((99.5, 101.5)));

        // A better level re-establishes the best.
        book.apply(Side::Buy, 100.25, 0.4);
        assert_eq!(book.best(), Some((100.25, 101.5)));
    }

    #[test]
    fn test_one_sided_book_yields_no_best() {
        let mut book = BookTop::default();
        book.apply(Side::Buy, 100.0, 1.0);
        assert_eq!(book.best(), None);
        book.apply(Side::Buy, 100.0, 0.0);
        assert_eq!(book.best(), None);
    }

    #[test]
    fn test_tracker_bounded() {
        let mut book = BookTop::default();
        for i in 0..25 {
            book.apply(Side::Buy, 100.0 + i as f64, 1.0);
            book.apply(Side::Sell, 200.0 + i as f64, 1.0);
        }
        assert!(book.bids.len() <= MAX_TRACKED_LEVELS);
        assert!(book.asks.len() <= MAX_TRACKED_LEVELS);
        // Highest bids and lowest asks survive pruning.
        assert_eq!(book.best(), Some((124.0, 200.0)));
    }

    #[test]
    fn test_best_if_changed_dedupes() {
        let mut book = BookTop::default();
        book.apply(Side::Buy, 100.0, 1.0);
        book.apply(Side::Sell, 101.0, 1.0);
        assert!(book.best_if_changed().is_some());
        assert!(book.best_if_changed().is_none());
        book.apply(Side::Buy, 100.5, 1.0);
        assert_eq!(book.best_if_changed(), Some((100.5, 101.0)));
    }

    #[test]
    fn test_market_mapping() {
        assert_eq!(market_for("BTC"), "BTC-USD-PERP");
        assert_eq!(normalize(&market_for("BTC")), "BTC-USD");
    }
}
