pub mod loader;
pub mod resolution;
pub mod stats;

// Re-export the chart surface (e.g. `use crate::chart::ChartDataLoader`).
pub use loader::{CandleFetcher, CandleQuery, CandleResponse, ChartDataLoader, FetchError};
pub use resolution::{Resolution, Timeframe};
pub use stats::DerivedStats;
