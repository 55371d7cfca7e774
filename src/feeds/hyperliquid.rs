//! Hyperliquid streaming adapter: `bbo` channel over the public websocket.
//!
//! One subscription per coin; heartbeats are `{"method":"ping"}` frames
//! answered by a `pong` channel message. Subscription acks arrive on
//! `subscriptionResponse` and are handled silently.

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

const DEFAULT_WS_URL: &str = "wss://api.hyperliquid.xyz/ws";

pub struct HyperliquidFeed;

/// Hyperliquid's native coin id for a canonical base.
fn coin_for(base: &str) -> String {
    match base {
        "PEPE" => "kPEPE".to_string(),
        "BONK" => "kBONK".to_string(),
        _ => base.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct BboLevel {
    px: String,
    #[allow(dead_code)]
    sz: String,
}

#[derive(Debug, Deserialize)]
struct BboData {
    coin: String,
    bbo: [Option<BboLevel>; 2],
}

#[async_trait]
impl QuoteFeed for HyperliquidFeed {
    fn venue(&self) -> VenueId {
        VenueId::Hyperliquid
    }

    async fn run(&self, ctx: AdapterContext) {
        let url = ctx
            .settings
            .url_override
            .clone()
            .unwrap_or_else(|| DEFAULT_WS_URL.to_string());
        let mut reporter = StateReporter::new(self.venue(), ctx.states.clone());
        let mut backoff = Backoff::new(ctx.settings.max_reconnect_attempts);
        let mut coins: Vec<String> = ctx.settings.symbols.iter().map(|s| coin_for(s)).collect();
        let mut shutdown = ctx.shutdown.clone();

        while !ctx.shutting_down() {
            reporter
                .transition(VenueConnectionState::Connecting, None)
                .await;

            match self
                .session(&ctx, &url, &mut coins, &mut reporter, &mut backoff)
                .await
            {
                Ok(()) => break, // shutdown requested
                Err(e) => {
                    debug!(error = %e, "hyperliquid session ended");
                    reporter
                        .transition(VenueConnectionState::Degraded, Some(e.to_string()))
                        .await;
                }
            }

            reporter.transition(VenueConnectionState::Closed, None).await;
            if ctx.shutting_down() {
                break;
            }
            let delay = backoff.next_delay("hyperliquid");
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
        }

        reporter.transition(VenueConnectionState::Closed, None).await;
    }
}

impl HyperliquidFeed {
    async fn session(
        &self,
        ctx: &AdapterContext,
        url: &str,
        coins: &mut Vec<String>,
        reporter: &mut StateReporter,
        backoff: &mut Backoff,
    ) -> Result<()> {
        let (ws_stream, _) = connect_async(url).await.context("connect")?;
        info!(url, coins = coins.len(), "hyperliquid connected");
        reporter.transition(VenueConnectionState::Open, None).await;
        backoff.reset();

        let (mut write, mut read) = ws_stream.split();

        for coin in coins.iter() {
            let sub = serde_json::json!({
                "method": "subscribe",
                "subscription": { "type": "bbo", "coin": coin },
            });
            write
                .send(Message::Text(sub.to_string()))
                .await
                .context("send subscription")?;
        }

        let mut heartbeat = interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shutdown = ctx.shutdown.clone();

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    write
                        .send(Message::Text(r#"{"method":"ping"}"#.to_string()))
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
                        Message::Text(text) => self.handle_text(ctx, &text, coins).await,
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

    async fn handle_text(&self, ctx: &AdapterContext, text: &str, coins: &mut Vec<String>) {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "hyperliquid: unparseable frame dropped");
                return;
            }
        };

        match value.get("channel").and_then(|c| c.as_str()) {
            Some("bbo") => {
                let Some(data) = value.get("data") else { return };
                let data: BboData = match serde_json::from_value(data.clone()) {
                    Ok(d) => d,
                    Err(e) => {
                        debug!(error = %e, "hyperliquid: bad bbo payload dropped");
                        return;
                    }
                };
                let [Some(bid_level), Some(ask_level)] = data.bbo else {
                    return; // one-sided book, nothing to quote
                };
                let (Ok(bid), Ok(ask)) =
                    (bid_level.px.parse::<f64>(), ask_level.px.parse::<f64>())
                else {
                    debug!(coin = %data.coin, "hyperliquid: bad price string dropped");
                    return;
                };
                if bid <= 0.0 || ask <= 0.0 {
                    return;
                }
                ctx.emit_quote(Quote {
                    venue: VenueId::Hyperliquid,
                    symbol: normalize(&data.coin),
                    bid,
                    ask,
                    observed_at: Utc::now(),
                    synthetic: false,
                })
                .await;
            }
            Some("subscriptionResponse") | Some("pong") => {}
            Some("error") => {
                let detail = value
                    .get("data")
                    .and_then(|d| d.as_str())
                    .unwrap_or("")
                    .to_string();
                // An invalid-coin rejection drops that coin from the working
                // set; anything else is logged and ignored.
                if let Some(bad) = coins.iter().position(|c| detail.contains(c.as_str())) {
                    let removed = coins.remove(bad);
                    warn!(coin = %removed, detail = %detail, "hyperliquid rejected subscription, removing coin");
                } else {
                    warn!(detail = %detail, "hyperliquid error frame");
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::{mpsc, watch};

    fn test_ctx() -> (AdapterContext, mpsc::Receiver<Quote>) {
        let (quote_tx, quote_rx) = mpsc::channel(16);
        let (state_tx, _state_rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = AdapterContext {
            quotes: quote_tx,
            states: state_tx,
            shutdown: shutdown_rx,
            settings: crate::feeds::AdapterSettings {
                symbols: vec!["BTC".to_string()],
                url_override: None,
                watchdog_interval: std::time::Duration::from_secs(15),
                poll_interval: std::time::Duration::from_secs(1),
                max_reconnect_attempts: 10,
            },
        };
        (ctx, quote_rx)
    }

    #[tokio::test]
    async fn test_bbo_frame_emits_quote() {
        let (ctx, mut quote_rx) = test_ctx();
        let feed = HyperliquidFeed;
        let mut coins = vec!["BTC".to_string()];

        let frame = r#"{"channel":"bbo","data":{"coin":"BTC","time":1700000000000,
            "bbo":[{"px":"50000.5","sz":"1.2","n":3},{"px":"50001.0","sz":"0.8","n":2}]}}"#;
        feed.handle_text(&ctx, frame, &mut coins).await;

        let quote = quote_rx.try_recv().unwrap();
        assert_eq!(quote.venue, VenueId::Hyperliquid);
        assert_eq!(quote.symbol, "BTC-USD");
        assert!((quote.bid - 50000.5).abs() < 1e-9);
        assert!((quote.ask - 50001.0).abs() < 1e-9);
        assert!(!quote.synthetic);
    }

    #[tokio::test]
    async fn test_one_sided_bbo_dropped() {
        let (ctx, mut quote_rx) = test_ctx();
        let feed = HyperliquidFeed;
        let mut coins = vec!["BTC".to_string()];

        let frame = r#"{"channel":"bbo","data":{"coin":"BTC","time":1,
            "bbo":[{"px":"50000.5","sz":"1.2","n":3},null]}}"#;
        feed.handle_text(&ctx, frame, &mut coins).await;
        assert!(quote_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_error_frame_removes_coin() {
        let (ctx, _quote_rx) = test_ctx();
        let feed = HyperliquidFeed;
        let mut coins = vec!["BTC".to_string(), "NOPE".to_string()];

        let frame = r#"{"channel":"error","data":"Invalid subscription: unknown coin NOPE"}"#;
        feed.handle_text(&ctx, frame, &mut coins).await;
        assert_eq!(coins, vec!["BTC".to_string()]);
    }

    #[tokio::test]
    async fn test_garbage_frame_dropped() {
        let (ctx, mut quote_rx) = test_ctx();
        let feed = HyperliquidFeed;
        let mut coins = vec!["BTC".to_string()];
        feed.handle_text(&ctx, "not json at all", &mut coins).await;
        feed.handle_text(&ctx, r#"{"channel":"bbo","data":{"coin":"BTC"}}"#, &mut coins)
            .await;
        assert!(quote_rx.try_recv().is_err());
    }

    #[test]
    fn test_coin_mapping() {
        assert_eq!(coin_for("BTC"), "BTC");
        assert_eq!(coin_for("PEPE"), "kPEPE");
    }
}
