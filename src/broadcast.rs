//! Fan-out: price updates coalesced into time-batched frames, opportunities
//! and venue-state transitions forwarded immediately.

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::{
    DetectorStats, Opportunity, PriceUpdate, Quote, VenueConnectionState, VenueStateEvent,
    WsServerEvent,
};

/// Outbound event hub. Subscribers receive every event and filter locally at
/// fan-out time (see the gateway); sends with no receivers are dropped.
pub struct Broadcaster {
    tx: broadcast::Sender<WsServerEvent>,
    pending: Mutex<Vec<PriceUpdate>>,
    max_batch: usize,
}

impl Broadcaster {
    pub fn new(max_batch: usize) -> Self {
        let (tx, _) = broadcast::channel(2048);
        Self {
            tx,
            pending: Mutex::new(Vec::new()),
            max_batch: max_batch.max(1),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WsServerEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Append a price update to the pending buffer. An oversized buffer is
    /// flushed early instead of waiting for the interval tick.
    pub fn push_quote(&self, quote: &Quote) {
        let batch = {
            let mut pending = self.pending.lock();
            pending.push(PriceUpdate::from(quote));
            if pending.len() >= self.max_batch {
                Some(std::mem::take(&mut *pending))
            } else {
                None
            }
        };
        if let Some(batch) = batch {
            debug!(len = batch.len(), "price buffer hit max batch, flushing early");
            self.emit(WsServerEvent::PriceBatch(batch));
        }
    }

    /// Emit the pending buffer as a single frame, if non-empty. Driven by the
    /// broadcast-interval scheduler. Returns the number of updates flushed.
    pub fn flush(&self) -> usize {
        let batch = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                return 0;
            }
            std::mem::take(&mut *pending)
        };
        let len = batch.len();
        self.emit(WsServerEvent::PriceBatch(batch));
        len
    }

    pub fn send_opportunity(&self, opportunity: Opportunity) {
        self.emit(WsServerEvent::Opportunity(opportunity));
    }

    pub fn send_stats(&self, stats: DetectorStats) {
        self.emit(WsServerEvent::Stats(stats));
    }

    /// Map a connection-state transition onto the wire. `Connecting` is
    /// internal and produces no client event.
    pub fn send_state(&self, event: &VenueStateEvent) {
        match event.state {
            VenueConnectionState::Open => {
                self.emit(WsServerEvent::ExchangeConnected { exchange: event.venue });
            }
            VenueConnectionState::Closed => {
                self.emit(WsServerEvent::ExchangeDisconnected { exchange: event.venue });
            }
            VenueConnectionState::Degraded => {
                self.emit(WsServerEvent::ExchangeError {
                    exchange: event.venue,
                    error: event.detail.clone().unwrap_or_else(|| "degraded".to_string()),
                });
            }
            VenueConnectionState::Connecting => {}
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    fn emit(&self, event: WsServerEvent) {
        let _ = self.tx.send(event);
    }
}
