// =============================================================================
// stox — Personal Stock Exchange Monitor — Main Entry Point
// =============================================================================
//
// Headless wiring of the three subsystems: the watch list feeds symbols into
// per-symbol live subscriptions on the shared multiplexer, and the chart
// loader follows the watched symbols. Rendering is left to frontends; this
// binary logs what a UI would show.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod chart;
mod config;
mod finnhub;
mod persist;
mod stream;
mod types;
mod watchlist;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::chart::{ChartDataLoader, Resolution, Timeframe};
use crate::config::Settings;
use crate::finnhub::FinnhubClient;
use crate::persist::FileKvStore;
use crate::stream::{Backoff, Throttle, TickMultiplexer, WsConnector};
use crate::types::TickEvent;
use crate::watchlist::{AddOutcome, WatchList};

const SETTINGS_PATH: &str = "stox_settings.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("stox — personal stock exchange monitor — starting up");

    let mut settings = Settings::load(SETTINGS_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load settings, using defaults");
        Settings::default()
    });

    // Override the default symbols from env if available.
    if let Ok(syms) = std::env::var("STOX_SYMBOLS") {
        settings.default_symbols = syms
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    let token = Settings::api_token();
    if token.is_empty() {
        warn!("FINNHUB_TOKEN is not set — upstream will reject requests");
    }

    // ── 2. Watch list ────────────────────────────────────────────────────
    let store = Arc::new(FileKvStore::new(&settings.state_path));
    let mut watch_list = WatchList::load(store, &settings.default_symbols, settings.max_watched);

    // One-shot mutations from env, the headless stand-in for the UI's
    // search-and-add / edit-and-remove flows.
    if let Ok(symbol) = std::env::var("STOX_WATCH") {
        match watch_list.add(&symbol) {
            AddOutcome::Added => info!(symbol = %symbol, "added to watch list"),
            AddOutcome::AlreadyWatched => info!(symbol = %symbol, "already watched"),
            AddOutcome::LimitReached => {
                warn!(max = settings.max_watched, "watch list limit reached")
            }
        }
    }
    if let Ok(symbol) = std::env::var("STOX_UNWATCH") {
        if watch_list.contains(&symbol) {
            watch_list.remove(&symbol);
            info!(symbol = %symbol, "removed from watch list");
        }
    }

    info!(symbols = ?watch_list.symbols(), "watch list ready");

    // ── 3. Subscription multiplexer ──────────────────────────────────────
    let connector = Arc::new(WsConnector::new(&settings.ws_url, &token));
    let backoff = Backoff::new(
        Duration::from_millis(settings.reconnect_initial_ms),
        Duration::from_millis(settings.reconnect_max_ms),
    );
    let mux = TickMultiplexer::new(connector, backoff);

    // One consumer per watched symbol, sampled to at most one log line per
    // second — sampling is the consumer's concern, not the multiplexer's.
    for symbol in watch_list.symbols() {
        let mut sub = mux.subscribe(symbol);
        tokio::spawn(async move {
            let mut throttle = Throttle::new(Duration::from_secs(1));
            while let Some(event) = sub.recv().await {
                match event {
                    TickEvent::Trade(tick) => {
                        if throttle.admit() {
                            info!(symbol = %tick.symbol, price = tick.price, "live");
                        }
                    }
                    TickEvent::Rejected { reason } => {
                        warn!(symbol = %sub.symbol(), reason = %reason, "subscription rejected");
                        break;
                    }
                }
            }
        });
    }
    info!(count = watch_list.len(), "live subscriptions opened");

    // ── 4. Chart data loader ─────────────────────────────────────────────
    let rest = FinnhubClient::new(&settings.rest_base_url, &token);

    // Optional one-shot symbol lookup, the search box's backend.
    if let Ok(query) = std::env::var("STOX_LOOKUP") {
        match rest.search_symbols(&query).await {
            Ok(results) => {
                for candidate in &results {
                    info!(candidate = %candidate, "lookup result");
                }
            }
            Err(e) => warn!(error = %e, "symbol lookup failed"),
        }
    }

    let timeframe = match std::env::var("STOX_RANGE").as_deref() {
        Ok("1D") => Timeframe::last_day(),
        Ok("1W") => Timeframe::last_week(),
        Ok("1M") => Timeframe::last_month(),
        Ok("6M") => Timeframe::last_six_months(),
        _ => Timeframe::last_year(),
    };

    let symbols: Vec<String> = watch_list.symbols().to_vec();
    let selected = symbols.first().cloned().unwrap_or_else(|| "AAPL".to_string());
    info!(symbol = %selected, range = ?timeframe.label, "chart opens on first watched symbol");

    let loader = Arc::new(ChartDataLoader::new(
        Arc::new(rest),
        &selected,
        Resolution::Day,
        timeframe,
    ));

    // Walk the chart through the watch list, the way a user clicking down
    // the list would.
    if symbols.len() > 1 {
        let cycle_loader = loader.clone();
        let cycle_symbols = symbols.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            interval.tick().await; // first tick fires immediately
            let mut index = 0;
            loop {
                interval.tick().await;
                index = (index + 1) % cycle_symbols.len();
                cycle_loader.set_symbol(&cycle_symbols[index]);
            }
        });
    }

    // Log the chart state a frontend would render.
    let snapshot_mux = mux.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            let snap = loader.snapshot();
            if snap.is_loading {
                continue;
            }
            if snap.is_error {
                warn!(symbol = %snap.symbol, "chart load failed — awaiting next selection");
                continue;
            }
            info!(
                symbol = %snap.symbol,
                resolution = %snap.resolution,
                range = ?snap.timeframe.label,
                points = snap.series.len(),
                average = ?snap.stats.average,
                connection = %snapshot_mux.connection_state(),
                "chart snapshot"
            );
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    if let Err(e) = settings.save(SETTINGS_PATH) {
        error!(error = %e, "Failed to save settings on shutdown");
    }

    info!("stox shut down complete.");
    Ok(())
}
