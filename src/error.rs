//! Custom error types for the application.
//!
//! This module defines the primary error type, `AlignError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different failure modes of an alignment
//! console, from configuration problems to hardware signals that are not yet
//! connected.
//!
//! ## Error Hierarchy
//!
//! - **`Configuration`**: Semantically invalid input, such as a sensor
//!   geometry with a zero-pixel axis. Fatal to the operation that produced it
//!   (e.g. a single bind attempt), never to the process.
//! - **`NotConnected`**: A hardware signal is unavailable. Recoverable: the
//!   widget group that hit it stays unbound and the user can retry by
//!   re-selecting the same item.
//! - **`Config`**: Wraps `figment` errors from the layered TOML/env
//!   application configuration.
//! - **`Io`** / **`Json`**: File and parse errors from the JSON device map
//!   and nominal-goal files.
//! - **`Engine`** / **`EngineBusy`**: Run-control failures surfaced by the
//!   execution engine.
//!
//! Stale centroid callbacks are deliberately *not* an error: a tick tagged
//! with a superseded binding epoch is silently discarded.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, AlignError>;

/// Application-wide error taxonomy.
#[derive(Error, Debug)]
pub enum AlignError {
    /// Semantically invalid input (geometry, plan construction, ...).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A hardware signal is not available yet.
    #[error("device '{device}': signal '{signal}' is not connected")]
    NotConnected {
        /// Name of the device that owns the signal.
        device: String,
        /// Signal identifier within the device.
        signal: String,
    },

    /// Layered application-configuration error.
    #[error("config file error: {0}")]
    Config(#[from] figment::Error),

    /// I/O error reading or writing config files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON in the device map or nominal-goal file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Plan execution failed inside the engine.
    #[error("engine error: {0}")]
    Engine(String),

    /// A plan was submitted while the engine was not idle.
    #[error("engine is busy ({0})")]
    EngineBusy(String),
}

impl AlignError {
    /// Whether the caller can reasonably retry after this error.
    ///
    /// Mirrors the split used for logging: recoverable errors are warnings,
    /// the rest are errors.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AlignError::NotConnected { .. }
                | AlignError::Configuration(_)
                | AlignError::EngineBusy(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_connected_is_recoverable() {
        let err = AlignError::NotConnected {
            device: "hx2".into(),
            signal: "array_size".into(),
        };
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("hx2"));
    }

    #[test]
    fn io_is_not_recoverable() {
        let err = AlignError::Io(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(!err.is_recoverable());
    }
}
