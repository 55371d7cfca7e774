//! Venue adapters: one resilient connection per venue, translating native
//! message protocols into normalized [`Quote`]s on a shared intake channel.

pub mod backpack;
pub mod drift;
pub mod hyperliquid;
pub mod lighter;
pub mod paradex;
pub mod session;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::models::{Config, Quote, VenueConnectionState, VenueId, VenueStateEvent};

/// Bound on how long `stop()` waits for an adapter to release its transport.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Stagger between per-symbol requests in polling adapters.
pub const POLL_STAGGER: Duration = Duration::from_millis(50);

/// Per-request timeout for polling adapters.
pub const POLL_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Heartbeat cadence on streaming connections.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Everything an adapter needs to run: senders, shutdown signal, settings.
pub struct AdapterContext {
    pub quotes: mpsc::Sender<Quote>,
    pub states: mpsc::Sender<VenueStateEvent>,
    pub shutdown: watch::Receiver<bool>,
    pub settings: AdapterSettings,
}

#[derive(Debug, Clone)]
pub struct AdapterSettings {
    /// Canonical uppercase bases (e.g. "BTC"); each adapter maps these to its
    /// native market ids.
    pub symbols: Vec<String>,
    pub url_override: Option<String>,
    pub watchdog_interval: Duration,
    pub poll_interval: Duration,
    pub max_reconnect_attempts: u32,
}

impl AdapterContext {
    pub fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Hand a quote to the pipeline. Send failures mean the receiver is gone
    /// (shutdown); they are dropped silently.
    pub async fn emit_quote(&self, quote: Quote) {
        let _ = self.quotes.send(quote).await;
    }
}

/// Capability interface implemented once per venue.
#[async_trait]
pub trait QuoteFeed: Send + Sync + 'static {
    fn venue(&self) -> VenueId;

    /// Run until shutdown. Recoverable conditions (transport errors, parse
    /// failures, rejected subscriptions) are handled internally and never
    /// escalate out of the task.
    async fn run(&self, ctx: AdapterContext);
}

/// Publishes connection-state transitions, deduplicating repeats.
pub struct StateReporter {
    venue: VenueId,
    tx: mpsc::Sender<VenueStateEvent>,
    current: Option<VenueConnectionState>,
}

impl StateReporter {
    pub fn new(venue: VenueId, tx: mpsc::Sender<VenueStateEvent>) -> Self {
        Self { venue, tx, current: None }
    }

    pub async fn transition(&mut self, state: VenueConnectionState, detail: Option<String>) {
        if self.current == Some(state) {
            return;
        }
        self.current = Some(state);
        debug!(venue = %self.venue, state = %state, "connection state transition");
        let event = VenueStateEvent {
            venue: self.venue,
            state,
            detail,
            at: Utc::now(),
        };
        let _ = self.tx.send(event).await;
    }
}

/// Last known connection state per venue, shared with the REST surface.
#[derive(Clone, Default)]
pub struct VenueHealth {
    inner: Arc<RwLock<HashMap<VenueId, VenueStateEvent>>>,
}

impl VenueHealth {
    pub fn record(&self, event: &VenueStateEvent) {
        self.inner.write().insert(event.venue, event.clone());
    }

    pub fn snapshot(&self) -> Vec<VenueStateEvent> {
        let mut states: Vec<VenueStateEvent> = self.inner.read().values().cloned().collect();
        states.sort_by_key(|e| e.venue.as_str());
        states
    }
}

/// Starts and supervises one adapter task per enabled venue.
pub struct FeedPool {
    handles: Vec<(VenueId, JoinHandle<()>)>,
    shutdown_tx: watch::Sender<bool>,
}

impl FeedPool {
    /// Spawn every enabled adapter. Returns the pool handle plus the merged
    /// quote and venue-state streams.
    pub fn start(config: &Config) -> (Self, mpsc::Receiver<Quote>, mpsc::Receiver<VenueStateEvent>) {
        let (quote_tx, quote_rx) = mpsc::channel::<Quote>(4096);
        let (state_tx, state_rx) = mpsc::channel::<VenueStateEvent>(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut handles = Vec::new();
        for venue in config.enabled_venues() {
            let feed = make_feed(venue);
            let ctx = AdapterContext {
                quotes: quote_tx.clone(),
                states: state_tx.clone(),
                shutdown: shutdown_rx.clone(),
                settings: AdapterSettings {
                    symbols: config.symbols.clone(),
                    url_override: config.venue(venue).url_override.clone(),
                    watchdog_interval: Duration::from_millis(config.watchdog_interval_ms),
                    poll_interval: Duration::from_millis(config.poll_interval_ms),
                    max_reconnect_attempts: config.max_reconnect_attempts,
                },
            };
            let handle = tokio::spawn(async move {
                feed.run(ctx).await;
            });
            handles.push((venue, handle));
            info!(venue = %venue, "adapter launched");
        }

        (Self { handles, shutdown_tx }, quote_rx, state_rx)
    }

    /// Signal every adapter and wait up to the shutdown grace per task;
    /// stragglers are aborted.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        for (venue, mut handle) in self.handles {
            match timeout(SHUTDOWN_GRACE, &mut handle).await {
                Ok(_) => debug!(venue = %venue, "adapter stopped"),
                Err(_) => {
                    warn!(venue = %venue, "adapter did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
    }
}

fn make_feed(venue: VenueId) -> Arc<dyn QuoteFeed> {
    match venue {
        VenueId::Hyperliquid => Arc::new(hyperliquid::HyperliquidFeed),
        VenueId::Paradex => Arc::new(paradex::ParadexFeed),
        VenueId::Backpack => Arc::new(backpack::BackpackFeed),
        VenueId::Drift => Arc::new(drift::DriftFeed::new()),
        VenueId::Lighter => Arc::new(lighter::LighterFeed::new()),
    }
}
