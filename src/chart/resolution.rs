// =============================================================================
// Resolutions & timeframes — candle granularity and the availability policy
// =============================================================================

use serde::{Deserialize, Serialize};

const DAY_SECS: i64 = 86_400;

/// Candle sampling granularity, finest to coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    Min1,
    Min5,
    Min15,
    Min30,
    Hour,
    Day,
    Week,
    Month,
}

impl Resolution {
    /// Every resolution, finest first. Fallback scans walk this order.
    pub const ALL: [Resolution; 8] = [
        Resolution::Min1,
        Resolution::Min5,
        Resolution::Min15,
        Resolution::Min30,
        Resolution::Hour,
        Resolution::Day,
        Resolution::Week,
        Resolution::Month,
    ];

    /// Code used by the history endpoint.
    pub fn wire_code(&self) -> &'static str {
        match self {
            Self::Min1 => "1",
            Self::Min5 => "5",
            Self::Min15 => "15",
            Self::Min30 => "30",
            Self::Hour => "60",
            Self::Day => "D",
            Self::Week => "W",
            Self::Month => "M",
        }
    }

    /// Canonical display label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Min1 => "1m",
            Self::Min5 => "5m",
            Self::Min15 => "15m",
            Self::Min30 => "30m",
            Self::Hour => "1h",
            Self::Day => "1D",
            Self::Week => "1W",
            Self::Month => "1M",
        }
    }

    /// Longest timeframe span this resolution is offered for, in seconds.
    /// `None` means always available.
    fn max_span_secs(&self) -> Option<i64> {
        match self {
            Self::Min1 => Some(3 * DAY_SECS),
            Self::Min5 => Some(7 * DAY_SECS),
            Self::Min15 => Some(30 * DAY_SECS),
            Self::Min30 => Some(60 * DAY_SECS),
            Self::Hour => Some(180 * DAY_SECS),
            Self::Day | Self::Week | Self::Month => None,
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Resolutions not offered for a timeframe spanning `span_secs`.
///
/// Deterministic and monotone: growing the span only ever disables more.
pub fn disabled_for_span(span_secs: i64) -> Vec<Resolution> {
    Resolution::ALL
        .into_iter()
        .filter(|r| matches!(r.max_span_secs(), Some(max) if span_secs > max))
        .collect()
}

/// The finest resolution still offered for `span_secs`. Daily and coarser
/// are never disabled, so there is always one.
pub fn finest_available(span_secs: i64) -> Resolution {
    Resolution::ALL
        .into_iter()
        .find(|r| !matches!(r.max_span_secs(), Some(max) if span_secs > max))
        .unwrap_or(Resolution::Month)
}

// =============================================================================
// Timeframe
// =============================================================================

/// Absolute date range bounding a historical query, unix seconds,
/// `from <= to`. May carry a preset label ("1W", "1Y", ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeframe {
    pub from: i64,
    pub to: i64,
    #[serde(default)]
    pub label: Option<String>,
}

impl Timeframe {
    /// Build a timeframe, swapping the endpoints if they arrive reversed so
    /// the `from <= to` invariant always holds.
    pub fn new(from: i64, to: i64) -> Self {
        Self {
            from: from.min(to),
            to: from.max(to),
            label: None,
        }
    }

    pub fn span_secs(&self) -> i64 {
        self.to - self.from
    }

    /// Preset ending now and reaching `days` back.
    fn preset(label: &str, days: i64) -> Self {
        let to = chrono::Utc::now().timestamp();
        Self {
            from: to - days * DAY_SECS,
            to,
            label: Some(label.to_string()),
        }
    }

    pub fn last_day() -> Self {
        Self::preset("1D", 1)
    }

    pub fn last_week() -> Self {
        Self::preset("1W", 7)
    }

    pub fn last_month() -> Self {
        Self::preset("1M", 30)
    }

    pub fn last_six_months() -> Self {
        Self::preset("6M", 182)
    }

    pub fn last_year() -> Self {
        Self::preset("1Y", 365)
    }
}
