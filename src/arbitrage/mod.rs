//! Arbitrage detection: cross-venue opportunity identification with
//! freshness, sanity, and cooldown guards.

pub mod detector;

pub use detector::{ArbitrageDetector, DetectorConfig};
