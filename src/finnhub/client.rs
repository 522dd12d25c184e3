// =============================================================================
// Finnhub REST Client — candle history and symbol search
// =============================================================================
//
// The token is sent as a query parameter, which is how this API
// authenticates. Responses use a status discriminator inside the body:
// `"s": "ok"` carries parallel arrays of candle fields, `"s": "no_data"` is
// a valid empty result, anything else is malformed.
// =============================================================================

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::{debug, instrument};

use crate::chart::loader::{CandleFetcher, CandleQuery, CandleResponse, FetchError};
use crate::chart::resolution::Resolution;
use crate::types::{CandlePoint, SymbolInfo};

/// Maximum number of rows a symbol search returns to the caller.
const SYMBOL_LOOKUP_LIMIT: usize = 20;

/// Finnhub REST API client.
#[derive(Clone)]
pub struct FinnhubClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl FinnhubClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new `FinnhubClient`.
    ///
    /// # Arguments
    /// * `base_url` — REST base, e.g. `https://finnhub.io/api/v1`.
    /// * `token`    — API token, appended to every request.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            token: token.into(),
            client,
        }
    }

    // -------------------------------------------------------------------------
    // Candle history
    // -------------------------------------------------------------------------

    /// GET /stock/candle — historical candles for one (symbol, resolution,
    /// range). A `no_data` body is a successful empty result.
    #[instrument(skip(self), name = "finnhub::get_candles")]
    pub async fn get_candles(
        &self,
        symbol: &str,
        resolution: Resolution,
        from: i64,
        to: i64,
    ) -> Result<CandleResponse, FetchError> {
        let url = format!("{}/stock/candle", self.base_url);
        let from_s = from.to_string();
        let to_s = to.to_string();
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol),
                ("resolution", resolution.wire_code()),
                ("from", from_s.as_str()),
                ("to", to_s.as_str()),
                ("token", self.token.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body: serde_json::Value = resp.json().await?;
        let parsed = parse_candle_body(&body)?;
        debug!(symbol = %symbol, "candle history retrieved");
        Ok(parsed)
    }

    // -------------------------------------------------------------------------
    // Symbol search
    // -------------------------------------------------------------------------

    /// GET /search — free-text symbol lookup, capped at
    /// [`SYMBOL_LOOKUP_LIMIT`] rows in endpoint order.
    #[instrument(skip(self), name = "finnhub::search_symbols")]
    pub async fn search_symbols(&self, query: &str) -> Result<Vec<SymbolInfo>, FetchError> {
        let url = format!("{}/search", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("q", query), ("token", self.token.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body: serde_json::Value = resp.json().await?;
        Ok(parse_search_body(&body))
    }
}

impl CandleFetcher for FinnhubClient {
    fn fetch_candles(
        &self,
        query: CandleQuery,
    ) -> BoxFuture<'static, Result<CandleResponse, FetchError>> {
        let client = self.clone();
        async move {
            client
                .get_candles(&query.symbol, query.resolution, query.from, query.to)
                .await
        }
        .boxed()
    }
}

// -----------------------------------------------------------------------------
// Body parsing
// -----------------------------------------------------------------------------

/// Parse a candle response body.
///
/// Expected shape:
/// ```json
/// { "s": "ok", "o": [1.0], "c": [1.1], "t": [1582641900], "v": [100] }
/// ```
fn parse_candle_body(body: &serde_json::Value) -> Result<CandleResponse, FetchError> {
    match body["s"].as_str() {
        Some("no_data") => Ok(CandleResponse::NoData),
        Some("ok") => {
            let opens = number_array(body, "o")?;
            let closes = number_array(body, "c")?;
            let stamps = number_array(body, "t")?;
            let volumes = number_array(body, "v")?;

            let len = closes.len();
            if opens.len() != len || stamps.len() != len || volumes.len() != len {
                return Err(FetchError::Malformed(
                    "candle field arrays have mismatched lengths".into(),
                ));
            }

            let series = (0..len)
                .map(|i| CandlePoint {
                    open_price: opens[i],
                    close_price: closes[i],
                    volume: volumes[i],
                    timestamp: stamps[i] as i64,
                })
                .collect();
            Ok(CandleResponse::Series(series))
        }
        Some(other) => Err(FetchError::Malformed(format!(
            "unexpected candle status {other:?}"
        ))),
        None => Err(FetchError::Malformed("candle body missing status".into())),
    }
}

fn number_array(body: &serde_json::Value, field: &str) -> Result<Vec<f64>, FetchError> {
    let array = body[field]
        .as_array()
        .ok_or_else(|| FetchError::Malformed(format!("candle body missing array {field:?}")))?;

    array
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| FetchError::Malformed(format!("non-numeric value in {field:?}")))
        })
        .collect()
}

/// Parse a search response body, dropping malformed rows and capping the
/// result.
///
/// Expected shape:
/// ```json
/// { "count": 1, "result": [ { "symbol": "AAPL", "description": "APPLE INC" } ] }
/// ```
fn parse_search_body(body: &serde_json::Value) -> Vec<SymbolInfo> {
    let rows = match body["result"].as_array() {
        Some(rows) => rows,
        None => return Vec::new(),
    };

    rows.iter()
        .filter_map(|row| {
            Some(SymbolInfo {
                symbol: row["symbol"].as_str()?.to_string(),
                description: row["description"].as_str().unwrap_or_default().to_string(),
            })
        })
        .take(SYMBOL_LOOKUP_LIMIT)
        .collect()
}
