//! Spreadwatch Backend Library
//!
//! Cross-venue perp quote aggregation and arbitrage detection. Exposes the
//! pipeline modules for the binary and the integration tests.

pub mod aggregator;
pub mod api;
pub mod arbitrage;
pub mod broadcast;
pub mod feeds;
pub mod gateway;
pub mod models;
pub mod symbols;

pub use aggregator::PriceAggregator;
pub use arbitrage::{ArbitrageDetector, DetectorConfig};
pub use broadcast::Broadcaster;
pub use models::{AggregatedView, Config, Opportunity, Quote, VenueId};
