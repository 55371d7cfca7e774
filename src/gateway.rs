//! Subscription gateway: the client-facing websocket endpoint.
//!
//! Each connection holds its own symbol/venue filter (empty = all). Outbound
//! frames are split per subscriber at fan-out time; invalid inbound frames
//! are rejected without dropping the connection.

use std::collections::HashSet;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::models::{PriceUpdate, VenueId, WsClientEvent, WsServerEvent};
use crate::symbols::normalize;

/// Per-connection subscription state.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    symbols: HashSet<String>,
    venues: HashSet<VenueId>,
}

impl SubscriptionFilter {
    pub fn matches_symbol(&self, symbol: &str) -> bool {
        self.symbols.is_empty() || self.symbols.contains(symbol)
    }

    pub fn matches_update(&self, update: &PriceUpdate) -> bool {
        self.matches_symbol(&update.symbol)
            && (self.venues.is_empty() || self.venues.contains(&update.exchange))
    }

    /// Project an outbound event through this filter. `None` means the event
    /// carries nothing for this subscriber.
    pub fn apply(&self, event: &WsServerEvent) -> Option<WsServerEvent> {
        match event {
            WsServerEvent::PriceBatch(updates) => {
                let filtered: Vec<PriceUpdate> = updates
                    .iter()
                    .filter(|u| self.matches_update(u))
                    .cloned()
                    .collect();
                if filtered.is_empty() {
                    None
                } else {
                    Some(WsServerEvent::PriceBatch(filtered))
                }
            }
            WsServerEvent::Opportunity(opp) => {
                self.matches_symbol(&opp.symbol).then(|| event.clone())
            }
            // Stats and venue-state events are always delivered.
            _ => Some(event.clone()),
        }
    }

    /// `subscribe:symbols` replaces the filter (not additive).
    pub fn subscribe_symbols(&mut self, raw: &[String]) {
        self.symbols = raw.iter().map(|s| normalize(s)).collect();
    }

    pub fn unsubscribe_symbols(&mut self, raw: &[String]) {
        for symbol in raw {
            self.symbols.remove(&normalize(symbol));
        }
    }

    /// `subscribe:exchanges` replaces the venue filter; unknown names are
    /// skipped with a log.
    pub fn subscribe_venues(&mut self, raw: &[String]) {
        self.venues = raw
            .iter()
            .filter_map(|name| {
                let venue = VenueId::parse(name);
                if venue.is_none() {
                    debug!(name = %name, "ignoring unknown venue in subscription");
                }
                venue
            })
            .collect();
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }
}

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut rx = state.broadcaster.subscribe();
    let mut filter = SubscriptionFilter::default();
    info!("gateway client connected");

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        let Some(filtered) = filter.apply(&event) else { continue };
                        let msg = serde_json::to_string(&filtered)
                            .unwrap_or_else(|e| {
                                warn!(error = %e, "failed to serialize outbound event");
                                "{}".to_string()
                            });
                        if socket.send(Message::Text(msg)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "gateway client lagged, frames dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => handle_client_frame(&text, &mut filter, &state),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    info!("gateway client disconnected");
}

fn handle_client_frame(text: &str, filter: &mut SubscriptionFilter, state: &AppState) {
    match serde_json::from_str::<WsClientEvent>(text) {
        Ok(WsClientEvent::SubscribeSymbols(symbols)) => {
            filter.subscribe_symbols(&symbols);
            debug!(count = filter.symbol_count(), "symbol filter replaced");
        }
        Ok(WsClientEvent::UnsubscribeSymbols(symbols)) => {
            filter.unsubscribe_symbols(&symbols);
        }
        Ok(WsClientEvent::SubscribeExchanges(venues)) => {
            filter.subscribe_venues(&venues);
        }
        Ok(WsClientEvent::ConfigUpdate(update)) => {
            state.detector.update_config(update);
        }
        Err(e) => {
            // Frame rejected, connection kept.
            debug!(error = %e, "rejecting invalid client frame");
        }
    }
}
