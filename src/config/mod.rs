// src/config/mod.rs
// Crate configuration, read once from the process environment
//
// The library never touches `.env` on its own. Applications that keep
// settings there call `load_dotenv()` before the first context is built.

use once_cell::sync::Lazy;
use std::str::FromStr;
use tracing::{Level, debug, warn};

/// Default capacity of each context's broadcast event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Read on first use, which is the first context built
pub static CONFIG: Lazy<TetherConfig> = Lazy::new(TetherConfig::from_env);

/// Load `.env` into the process environment (opt-in)
///
/// Only affects `CONFIG` when called before the first context is built.
/// Returns false when no `.env` file was found.
pub fn load_dotenv() -> bool {
    match dotenvy::dotenv() {
        Ok(path) => {
            debug!(path = %path.display(), "Loaded .env file");
            true
        }
        Err(err) => {
            debug!(error = %err, ".env file not loaded");
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TetherConfig {
    // ── Events
    /// Buffered events per `Context::subscribe` receiver before it lags
    pub event_capacity: usize,

    // ── Logging
    pub log_level: String,
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            log_level: "info".to_string(),
        }
    }
}

// Handles values with trailing comments and extra whitespace.
fn env_var_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(val) => {
            let clean_val = val.split('#').next().unwrap_or("").trim();
            match clean_val.parse::<T>() {
                Ok(parsed) => {
                    debug!(key, value = clean_val, "Config loaded from environment");
                    parsed
                }
                Err(_) => {
                    warn!(key, value = %val, "Config value failed to parse, using default");
                    default
                }
            }
        }
        Err(_) => default,
    }
}

impl TetherConfig {
    /// Build from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            // broadcast::channel panics on zero capacity
            event_capacity: env_var_or("TETHER_EVENT_CAPACITY", defaults.event_capacity).max(1),
            log_level: env_var_or("TETHER_LOG_LEVEL", defaults.log_level),
        }
    }

    /// `log_level` as a tracing level, falling back to INFO
    pub fn tracing_level(&self) -> Level {
        Level::from_str(self.log_level.trim()).unwrap_or(Level::INFO)
    }
}
