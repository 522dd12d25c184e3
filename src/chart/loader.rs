// =============================================================================
// Chart Data Loader — cancellable history fetches with last-write-wins
// =============================================================================
//
// The loader owns the current (symbol, resolution, timeframe) selection.
// Every selection change supersedes the in-flight fetch: the old task is
// aborted, and a generation stamp guarantees that even a response already in
// hand can never touch visible state once a newer selection exists. Per
// request the outcome is exactly one of Loaded, Errored, or Discarded.
//
// A failed fetch is retried only on the next explicit selection change,
// never automatically.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::resolution::{disabled_for_span, finest_available, Resolution, Timeframe};
use super::stats::{derive, DerivedStats};
use crate::types::{CandlePoint, CandleSeries};

// =============================================================================
// Fetch seam
// =============================================================================

/// One history request.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleQuery {
    pub symbol: String,
    pub resolution: Resolution,
    pub from: i64,
    pub to: i64,
}

/// Successful fetch outcome. "No data for this range" is a valid response,
/// distinct from failure.
#[derive(Debug, Clone, PartialEq)]
pub enum CandleResponse {
    Series(CandleSeries),
    NoData,
}

/// Why a fetch failed. Surfaced as the loader's error flag, never thrown
/// across component boundaries.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("history request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("history endpoint returned status {0}")]
    Status(u16),

    #[error("malformed history payload: {0}")]
    Malformed(String),
}

/// Issues cancellable candle requests. Implemented by the REST client and by
/// test fakes; the loader never sees a network.
pub trait CandleFetcher: Send + Sync {
    fn fetch_candles(
        &self,
        query: CandleQuery,
    ) -> BoxFuture<'static, Result<CandleResponse, FetchError>>;
}

// =============================================================================
// Loader
// =============================================================================

/// Everything a chart widget needs to render one frame.
#[derive(Debug, Clone)]
pub struct ChartSnapshot {
    pub symbol: String,
    pub resolution: Resolution,
    pub timeframe: Timeframe,
    pub series: CandleSeries,
    pub stats: DerivedStats,
    pub disabled_resolutions: Vec<Resolution>,
    pub is_loading: bool,
    pub is_error: bool,
}

struct LoaderState {
    symbol: String,
    resolution: Resolution,
    timeframe: Timeframe,
    series: CandleSeries,
    stats: DerivedStats,
    disabled: Vec<Resolution>,
    is_loading: bool,
    is_error: bool,
}

struct Inner {
    state: RwLock<LoaderState>,
    /// Stamp of the most recently issued fetch; only a completion carrying
    /// the current stamp may mutate visible state.
    generation: AtomicU64,
}

/// Owns the chart selection and the latest successfully fetched series.
pub struct ChartDataLoader {
    fetcher: Arc<dyn CandleFetcher>,
    inner: Arc<Inner>,
    in_flight: Mutex<Option<JoinHandle<()>>>,
}

impl ChartDataLoader {
    /// Build a loader and issue the initial fetch. Must be called within a
    /// tokio runtime. If `resolution` is not offered for `timeframe`'s span
    /// the finest available one is selected instead.
    pub fn new(
        fetcher: Arc<dyn CandleFetcher>,
        symbol: &str,
        resolution: Resolution,
        timeframe: Timeframe,
    ) -> Self {
        let span = timeframe.span_secs();
        let disabled = disabled_for_span(span);
        let resolution = if disabled.contains(&resolution) {
            finest_available(span)
        } else {
            resolution
        };

        let loader = Self {
            fetcher,
            inner: Arc::new(Inner {
                state: RwLock::new(LoaderState {
                    symbol: symbol.to_string(),
                    resolution,
                    timeframe,
                    series: Vec::new(),
                    stats: DerivedStats::default(),
                    disabled,
                    is_loading: false,
                    is_error: false,
                }),
                generation: AtomicU64::new(0),
            }),
            in_flight: Mutex::new(None),
        };
        loader.reload();
        loader
    }

    pub fn snapshot(&self) -> ChartSnapshot {
        let st = self.inner.state.read();
        ChartSnapshot {
            symbol: st.symbol.clone(),
            resolution: st.resolution,
            timeframe: st.timeframe.clone(),
            series: st.series.clone(),
            stats: st.stats,
            disabled_resolutions: st.disabled.clone(),
            is_loading: st.is_loading,
            is_error: st.is_error,
        }
    }

    /// Switch instruments. A no-op when the symbol is unchanged.
    pub fn set_symbol(&self, symbol: &str) {
        {
            let mut st = self.inner.state.write();
            if st.symbol == symbol {
                return;
            }
            st.symbol = symbol.to_string();
        }
        self.reload();
    }

    /// Select a resolution. Requests for a resolution the current span has
    /// disabled are ignored (the UI offers them greyed out).
    pub fn set_resolution(&self, resolution: Resolution) {
        {
            let mut st = self.inner.state.write();
            if st.resolution == resolution {
                return;
            }
            if st.disabled.contains(&resolution) {
                debug!(resolution = %resolution, "ignoring disabled resolution");
                return;
            }
            st.resolution = resolution;
        }
        self.reload();
    }

    /// Select a timeframe, recomputing which resolutions the new span
    /// offers. If the current resolution is no longer offered, falls back
    /// to the finest one that is.
    pub fn set_timeframe(&self, timeframe: Timeframe) {
        {
            let mut st = self.inner.state.write();
            if st.timeframe == timeframe {
                return;
            }
            let span = timeframe.span_secs();
            st.timeframe = timeframe;
            st.disabled = disabled_for_span(span);
            if st.disabled.contains(&st.resolution) {
                let fallback = finest_available(span);
                debug!(
                    from = %st.resolution,
                    to = %fallback,
                    "selected resolution disabled by new span — falling back"
                );
                st.resolution = fallback;
            }
        }
        self.reload();
    }

    /// Supersede any in-flight fetch and issue one for the current
    /// selection.
    fn reload(&self) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let query = {
            let mut st = self.inner.state.write();
            st.is_loading = true;
            st.is_error = false;
            CandleQuery {
                symbol: st.symbol.clone(),
                resolution: st.resolution,
                from: st.timeframe.from,
                to: st.timeframe.to,
            }
        };
        debug!(symbol = %query.symbol, resolution = %query.resolution, "issuing history fetch");

        let fetcher = self.fetcher.clone();
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let result = fetcher.fetch_candles(query).await;
            inner.apply(generation, result);
        });

        // Cooperative cancellation; the generation stamp covers the window
        // where the old task already holds a response.
        if let Some(superseded) = self.in_flight.lock().replace(handle) {
            superseded.abort();
        }
    }
}

impl Inner {
    /// Apply a fetch outcome, unless a newer selection has been issued since.
    fn apply(&self, generation: u64, result: Result<CandleResponse, FetchError>) {
        let mut st = self.state.write();
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("discarding superseded fetch result");
            return;
        }

        st.is_loading = false;
        match result {
            Ok(CandleResponse::Series(mut series)) => {
                // The series invariant is ascending timestamps; enforce it
                // rather than trusting the endpoint.
                series.sort_by_key(|p: &CandlePoint| p.timestamp);
                st.stats = derive(&series);
                st.series = series;
                st.is_error = false;
            }
            Ok(CandleResponse::NoData) => {
                st.series = Vec::new();
                st.stats = DerivedStats::default();
                st.is_error = false;
            }
            Err(e) => {
                warn!(error = %e, "history fetch failed");
                st.series = Vec::new();
                st.stats = DerivedStats::default();
                st.is_error = true;
            }
        }
    }
}
