// =============================================================================
// Engine Settings — persisted configuration with atomic save
// =============================================================================
//
// Every tunable of the stox engine lives here: endpoints, the state-file
// location, and the watch-list shape. All fields carry `#[serde(default)]`
// so that adding new fields never breaks loading an older settings file.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. The API token is read from the environment only and is never
// serialised.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_ws_url() -> String {
    "wss://ws.finnhub.io".to_string()
}

fn default_rest_base_url() -> String {
    "https://finnhub.io/api/v1".to_string()
}

fn default_state_path() -> String {
    "stox_state.json".to_string()
}

fn default_max_watched() -> usize {
    8
}

fn default_symbols() -> Vec<String> {
    vec![
        "FB".to_string(),
        "MSFT".to_string(),
        "WORK".to_string(),
        "UBER".to_string(),
    ]
}

fn default_reconnect_initial_ms() -> u64 {
    500
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

// =============================================================================
// Settings
// =============================================================================

/// Top-level settings for the stox engine.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // --- Endpoints ----------------------------------------------------------

    /// Streaming endpoint for live trades.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// REST base URL for candle history and symbol search.
    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,

    // --- Persistence --------------------------------------------------------

    /// Path of the key-value state file (watch list lives here).
    #[serde(default = "default_state_path")]
    pub state_path: String,

    // --- Watch list ---------------------------------------------------------

    /// Maximum number of watched symbols.
    #[serde(default = "default_max_watched")]
    pub max_watched: usize,

    /// Symbols used when no persisted watch list exists (or it is corrupt).
    #[serde(default = "default_symbols")]
    pub default_symbols: Vec<String>,

    // --- Reconnection -------------------------------------------------------

    /// Initial reconnect delay after a connection loss, milliseconds.
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    /// Upper bound on the exponential reconnect delay, milliseconds.
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            rest_base_url: default_rest_base_url(),
            state_path: default_state_path(),
            max_watched: default_max_watched(),
            default_symbols: default_symbols(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;

        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse settings from {}", path.display()))?;

        info!(
            path = %path.display(),
            ws_url = %settings.ws_url,
            max_watched = settings.max_watched,
            "settings loaded"
        );

        Ok(settings)
    }

    /// Persist the current settings to `path` using an atomic write (write to
    /// `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise settings to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp settings to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp settings to {}", path.display()))?;

        info!(path = %path.display(), "settings saved (atomic)");
        Ok(())
    }

    /// The streaming/REST API token, from the `FINNHUB_TOKEN` environment
    /// variable. Empty when unset; the endpoints will reject requests, which
    /// surfaces through the normal error paths rather than at startup.
    pub fn api_token() -> String {
        std::env::var("FINNHUB_TOKEN").unwrap_or_default()
    }
}
