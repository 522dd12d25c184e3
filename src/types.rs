// =============================================================================
// Shared types used across the stox engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// A single real-time trade event for one symbol.
///
/// Ticks are immutable points in time; the engine keeps no tick history —
/// consumers decide what to retain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Exchange-qualified instrument identifier (case-sensitive).
    pub symbol: String,
    /// Last trade price.
    pub price: f64,
    /// Trade time, unix milliseconds.
    pub timestamp: i64,
    /// Trade volume, when the upstream reports it.
    #[serde(default)]
    pub volume: Option<f64>,
}

/// What a live-tick listener receives on its channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TickEvent {
    /// A trade for the subscribed symbol.
    Trade(Tick),
    /// The upstream declined the subscription for this symbol. Other symbols
    /// are unaffected; the stream stays open.
    Rejected { reason: String },
}

/// One sampled interval of historical price data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandlePoint {
    pub open_price: f64,
    pub close_price: f64,
    pub volume: f64,
    /// Interval start, unix seconds.
    pub timestamp: i64,
}

/// An ordered historical series, ascending by timestamp. Possibly empty.
pub type CandleSeries = Vec<CandlePoint>;

/// A symbol lookup candidate, as returned by free-text search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub description: String,
}

impl std::fmt::Display for SymbolInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.symbol, self.description)
    }
}
