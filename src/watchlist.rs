// =============================================================================
// Watch List — ordered, capped, persisted symbol set
// =============================================================================
//
// Persisted layout: one key holding a JSON array of symbol strings in
// insertion order, most-recently-added LAST. Readers that want newest-first
// reverse at the display edge.
//
// Persistence failures are swallowed: the in-memory set stays authoritative
// for the session and the next successful write catches up.
// =============================================================================

use std::sync::Arc;

use tracing::{info, warn};

use crate::persist::KvStore;

/// Key under which the symbol list is stored.
pub const WATCHED_SYMBOLS_KEY: &str = "stox-watched-symbols";

/// Result of [`WatchList::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Symbol appended and persisted.
    Added,
    /// Symbol was already present; order and size unchanged. Counts as
    /// success.
    AlreadyWatched,
    /// The list is at capacity; nothing was mutated. The caller may surface
    /// a transient notice.
    LimitReached,
}

/// Ordered, capped set of watched symbols, loaded once at startup and
/// written through on every mutation.
pub struct WatchList {
    symbols: Vec<String>,
    store: Arc<dyn KvStore>,
    max: usize,
}

impl WatchList {
    /// Load the persisted list, falling back to `defaults` when nothing is
    /// stored or the blob does not parse. The fallback is never an error.
    pub fn load(store: Arc<dyn KvStore>, defaults: &[String], max: usize) -> Self {
        let symbols = match store.get(WATCHED_SYMBOLS_KEY) {
            Ok(Some(blob)) => match serde_json::from_str::<Vec<String>>(&blob) {
                Ok(stored) if !stored.is_empty() => stored,
                Ok(_) => defaults.to_vec(),
                Err(e) => {
                    warn!(error = %e, "stored watch list is corrupt — using defaults");
                    defaults.to_vec()
                }
            },
            Ok(None) => defaults.to_vec(),
            Err(e) => {
                warn!(error = %e, "failed to read stored watch list — using defaults");
                defaults.to_vec()
            }
        };

        // Defensive against hand-edited state: dedupe and enforce the cap.
        let mut seen = Vec::with_capacity(symbols.len());
        for s in symbols {
            if !seen.contains(&s) && seen.len() < max {
                seen.push(s);
            }
        }

        info!(count = seen.len(), "watch list loaded");
        Self {
            symbols: seen,
            store,
            max,
        }
    }

    /// Current symbols in insertion order, most-recently-added last.
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.iter().any(|s| s == symbol)
    }

    /// Append `symbol` to the list.
    pub fn add(&mut self, symbol: &str) -> AddOutcome {
        if self.contains(symbol) {
            return AddOutcome::AlreadyWatched;
        }
        if self.symbols.len() >= self.max {
            return AddOutcome::LimitReached;
        }
        self.symbols.push(symbol.to_string());
        self.persist();
        AddOutcome::Added
    }

    /// Remove `symbol`; a no-op if absent.
    pub fn remove(&mut self, symbol: &str) {
        let before = self.symbols.len();
        self.symbols.retain(|s| s != symbol);
        if self.symbols.len() != before {
            self.persist();
        }
    }

    /// Write-through persist. Failures are logged, never surfaced.
    fn persist(&self) {
        let blob = match serde_json::to_string(&self.symbols) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "failed to serialise watch list");
                return;
            }
        };
        if let Err(e) = self.store.set(WATCHED_SYMBOLS_KEY, &blob) {
            warn!(error = %e, "failed to persist watch list — keeping in-memory state");
        }
    }
}
