// src/error.rs
// Errors surfaced by typed value access
//
// Control operations never fail: `cancel`/`end` report no-ops through their
// bool return and cancellation causes travel as `CancelReason`.

/// Value store error types
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Failed to serialize value for key '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode value for key '{key}': {source}")]
    Deserialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode context values: {0}")]
    Values(#[from] serde_json::Error),
}

pub type Result<T, E = ContextError> = std::result::Result<T, E>;
