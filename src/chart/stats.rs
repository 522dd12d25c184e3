// =============================================================================
// Derived statistics — summary of the currently loaded candle series
// =============================================================================

use serde::Serialize;

use crate::types::CandlePoint;

/// Summary statistics over one candle series. Every field is `None` when the
/// series is empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DerivedStats {
    /// Timestamp of the first point.
    pub start: Option<i64>,
    /// Timestamp of the last point.
    pub end: Option<i64>,
    /// Minimum close price.
    pub min: Option<f64>,
    /// Maximum close price.
    pub max: Option<f64>,
    /// Arithmetic mean of close prices.
    pub average: Option<f64>,
}

/// Pure function of the series; deterministic, no other inputs.
pub fn derive(series: &[CandlePoint]) -> DerivedStats {
    let (first, last) = match (series.first(), series.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => return DerivedStats::default(),
    };

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    for point in series {
        min = min.min(point.close_price);
        max = max.max(point.close_price);
        sum += point.close_price;
    }

    DerivedStats {
        start: Some(first.timestamp),
        end: Some(last.timestamp),
        min: Some(min),
        max: Some(max),
        average: Some(sum / series.len() as f64),
    }
}
