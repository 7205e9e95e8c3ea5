//! Configuration for a calculator session.
//!
//! [`CalcConfig`] is a plain struct that hosts build however they like; no
//! config-file parsing is involved.
//!
//! # Example
//!
//! ```rust
//! use calcmaster::CalcConfig;
//! use std::path::PathBuf;
//! use std::time::Duration;
//!
//! // Defaults: "calcmaster_state.json" in the working directory, 30 day history
//! let config = CalcConfig::default();
//! assert_eq!(config.default_retention_days, 30);
//!
//! let config = CalcConfig {
//!     storage_path: PathBuf::from("/var/lib/calcmaster/state.json"),
//!     save_debounce: Duration::from_millis(50),
//!     ..CalcConfig::default()
//! };
//! ```

use std::path::PathBuf;
use std::time::Duration;

use super::history::DEFAULT_RETENTION_DAYS;

#[derive(Debug, Clone, PartialEq)]
pub struct CalcConfig {
    /// JSON file backing [`JsonFileStore`](crate::storage::JsonFileStore).
    pub storage_path: PathBuf,
    /// Retention window used until the user picks one. `0` keeps history forever.
    pub default_retention_days: u32,
    /// How long the save queue waits to coalesce writes before hitting storage.
    pub save_debounce: Duration,
}

impl Default for CalcConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("calcmaster_state.json"),
            default_retention_days: DEFAULT_RETENTION_DAYS,
            save_debounce: Duration::from_millis(250),
        }
    }
}
