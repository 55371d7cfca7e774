//! Backpack streaming adapter: `bookTicker` streams over the public
//! websocket, Binance-shaped payloads (string prices, combined-stream
//! wrapper).

use std::collections::HashMap;

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

const DEFAULT_WS_URL: &str = "wss://ws.backpack.exchange";

pub struct BackpackFeed;

fn stream_symbol(base: &str) -> String {
    format!("{base}_USDC_PERP")
}

/// bookTicker payload: `{"s":"BTC_USDC_PERP","b":"50000","a":"50001",...}`.
#[derive(Debug, Deserialize)]
struct BookTickerData {
    s: String,
    b: String,
    a: String,
}

#[async_trait]
impl QuoteFeed for BackpackFeed {
    fn venue(&self) -> VenueId {
        VenueId::Backpack
    }

    async fn run(&self, ctx: AdapterContext) {
        let url = ctx
            .settings
            .url_override
            .clone()
            .unwrap_or_else(|| DEFAULT_WS_URL.to_string());
        let mut reporter = StateReporter::new(self.venue(), ctx.states.clone());
        let mut backoff = Backoff::new(ctx.settings.max_reconnect_attempts);
        let mut symbols: Vec<String> = ctx.settings.symbols.iter().map(|s| stream_symbol(s)).collect();
        let mut shutdown = ctx.shutdown.clone();

        while !ctx.shutting_down() {
            reporter
                .transition(VenueConnectionState::Connecting, None)
                .await;

            match self
                .session(&ctx, &url, &mut symbols, &mut reporter, &mut backoff)
                .await
            {
                Ok(()) => break,
                Err(e) => {
                    debug!(error = %e, "backpack session ended");
                    reporter
                        .transition(VenueConnectionState::Degraded, Some(e.to_string()))
                        .await;
                }
            }

            reporter.transition(VenueConnectionState::Closed, None).await;
            if ctx.shutting_down() {
                break;
            }
            let delay = backoff.next_delay("backpack");
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
        }

        reporter.transition(VenueConnectionState::Closed, None).await;
    }
}

impl BackpackFeed {
    async fn session(
        &self,
        ctx: &AdapterContext,
        url: &str,
        symbols: &mut Vec<String>,
        reporter: &mut StateReporter,
        backoff: &mut Backoff,
    ) -> Result<()> {
        let (ws_stream, _) = connect_async(url).await.context("connect")?;
        info!(url, symbols = symbols.len(), "backpack connected");
        reporter.transition(VenueConnectionState::Open, None).await;
        backoff.reset();

        let (mut write, mut read) = ws_stream.split();

        let mut pending_subs: HashMap<u64, String> = HashMap::new();
        for (i, symbol) in symbols.iter().enumerate() {
            let id = i as u64 + 1;
            let sub = serde_json::json!({
                "method": "SUBSCRIBE",
                "params": [format!("bookTicker.{symbol}")],
                "id": id,
            });
            write
                .send(Message::Text(sub.to_string()))
                .await
                .context("send subscription")?;
            pending_subs.insert(id, symbol.clone());
        }

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
                            self.handle_text(ctx, &text, symbols, &mut pending_subs).await;
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

    async fn handle_text(
        &self,
        ctx: &AdapterContext,
        text: &str,
        symbols: &mut Vec<String>,
        pending_subs: &mut HashMap<u64, String>,
    ) {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "backpack: unparseable frame dropped");
                return;
            }
        };

        // Subscription replies carry an id; acks are silent, rejections drop
        // the symbol from the working set.
        if let Some(id) = value.get("id").and_then(|i| i.as_u64()) {
            let symbol = pending_subs.remove(&id);
            if let Some(err) = value.get("error") {
                let detail = err
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("subscription rejected");
                if let Some(symbol) = symbol {
                    warn!(symbol = %symbol, detail, "backpack rejected subscription, removing symbol");
                    symbols.retain(|s| s != &symbol);
                } else {
                    warn!(detail, "backpack error reply for unknown request");
                }
            }
            return;
        }

        let Some(data) = value.get("data") else { return };
        let data: BookTickerData = match serde_json::from_value(data.clone()) {
            Ok(d) => d,
            Err(e) => {
                debug!(error = %e, "backpack: bad bookTicker payload dropped");
                return;
            }
        };

        let (Ok(bid), Ok(ask)) = (data.b.parse::<f64>(), data.a.parse::<f64>()) else {
            debug!(symbol = %data.s, "backpack: bad price string dropped");
            return;
        };
        if bid <= 0.0 || ask <= 0.0 {
            return;
        }

        ctx.emit_quote(Quote {
            venue: VenueId::Backpack,
            symbol: normalize(&data.s),
            bid,
            ask,
            observed_at: Utc::now(),
            synthetic: false,
        })
        .await;
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
                symbols: vec!["SOL".to_string()],
                url_override: None,
                watchdog_interval: std::time::Duration::from_secs(15),
                poll_interval: std::time::Duration::from_secs(1),
                max_reconnect_attempts: 10,
            },
        };
        (ctx, quote_rx)
    }

    #[tokio::test]
    async fn test_book_ticker_emits_quote() {
        let (ctx, mut quote_rx) = test_ctx();
        let feed = BackpackFeed;
        let mut symbols = vec!["SOL_USDC_PERP".to_string()];
        let mut pending = HashMap::new();

        let frame = r#"{"stream":"bookTicker.SOL_USDC_PERP","data":
            {"e":"bookTicker","s":"SOL_USDC_PERP","b":"150.25","B":"10","a":"150.30","A":"8","E":1700000000000}}"#;
        feed.handle_text(&ctx, frame, &mut symbols, &mut pending).await;

        let quote = quote_rx.try_recv().unwrap();
        assert_eq!(quote.venue, VenueId::Backpack);
        assert_eq!(quote.symbol, "SOL-USD");
        assert!((quote.bid - 150.25).abs() < 1e-9);
        assert!((quote.ask - 150.30).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_subscription_ack_is_silent() {
        let (ctx, mut quote_rx) = test_ctx();
        let feed = BackpackFeed;
        let mut symbols = vec!["SOL_USDC_PERP".to_string()];
        let mut pending = HashMap::from([(1u64, "SOL_USDC_PERP".to_string())]);

        feed.handle_text(&ctx, r#"{"result":null,"id":1}"#, &mut symbols, &mut pending)
            .await;
        assert!(quote_rx.try_recv().is_err());
        assert!(pending.is_empty());
        assert_eq!(symbols.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_subscription_removes_symbol() {
        let (ctx, _quote_rx) = test_ctx();
        let feed = BackpackFeed;
        let mut symbols = vec!["SOL_USDC_PERP".to_string(), "NOPE_USDC_PERP".to_string()];
        let mut pending = HashMap::from([(2u64, "NOPE_USDC_PERP".to_string())]);

        let frame = r#"{"error":{"code":-1121,"message":"Invalid symbol"},"id":2}"#;
        feed.handle_text(&ctx, frame, &mut symbols, &mut pending).await;
        assert_eq!(symbols, vec!["SOL_USDC_PERP".to_string()]);
    }

    #[tokio::test]
    async fn test_zero_price_dropped() {
        let (ctx, mut quote_rx) = test_ctx();
        let feed = BackpackFeed;
        let mut symbols = vec!["SOL_USDC_PERP".to_string()];
        let mut pending = HashMap::new();

        let frame = r#"{"stream":"bookTicker.SOL_USDC_PERP","data":
            {"s":"SOL_USDC_PERP","b":"0","B":"0","a":"150.30","A":"8"}}"#;
        feed.handle_text(&ctx, frame, &mut symbols, &mut pending).await;
        assert!(quote_rx.try_recv().is_err());
    }

    #[test]
    fn test_stream_symbol_mapping() {
        assert_eq!(stream_symbol("BTC"), "BTC_USDC_PERP");
        assert_eq!(normalize("BTC_USDC_PERP"), "BTC-USD");
    }
}
