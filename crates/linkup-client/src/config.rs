//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so a client can start with zero
//! configuration.

use std::path::PathBuf;

use linkup_shared::constants::{
    ACTIVITY_FEED_LIMIT, DEFAULT_CHANGE_FEED_CAPACITY, DEFAULT_SUBSCRIPTION_BUFFER,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Database file location.
    /// Env: `LINKUP_DB_PATH`
    /// Default: platform data directory (see `Database::default_path`).
    pub db_path: Option<PathBuf>,

    /// Run without a backend. Every operation becomes a no-op.
    /// Env: `LINKUP_OFFLINE` (true/false)
    /// Default: `false`
    pub offline: bool,

    /// Maximum number of items in the activity feed.
    /// Env: `LINKUP_ACTIVITY_LIMIT`
    /// Default: `10`
    pub activity_limit: usize,

    /// Snapshots buffered per live subscription before the producer waits.
    /// Env: `LINKUP_SUBSCRIPTION_BUFFER`
    /// Default: `64`
    pub subscription_buffer: usize,

    /// Capacity of the store's change feed. Listeners that fall further
    /// behind re-run their query.
    /// Env: `LINKUP_CHANGE_FEED_CAPACITY`
    /// Default: `256`
    pub change_feed_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            offline: false,
            activity_limit: ACTIVITY_FEED_LIMIT,
            subscription_buffer: DEFAULT_SUBSCRIPTION_BUFFER,
            change_feed_capacity: DEFAULT_CHANGE_FEED_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("LINKUP_DB_PATH") {
            if !path.is_empty() {
                config.db_path = Some(PathBuf::from(path));
            }
        }

        if let Some(val) = lookup("LINKUP_OFFLINE") {
            config.offline = val == "true" || val == "1";
        }

        if let Some(val) = lookup("LINKUP_ACTIVITY_LIMIT") {
            if let Some(n) = parse_positive(&val, "LINKUP_ACTIVITY_LIMIT") {
                config.activity_limit = n;
            }
        }

        if let Some(val) = lookup("LINKUP_SUBSCRIPTION_BUFFER") {
            if let Some(n) = parse_positive(&val, "LINKUP_SUBSCRIPTION_BUFFER") {
                config.subscription_buffer = n;
            }
        }

        if let Some(val) = lookup("LINKUP_CHANGE_FEED_CAPACITY") {
            if let Some(n) = parse_positive(&val, "LINKUP_CHANGE_FEED_CAPACITY") {
                config.change_feed_capacity = n;
            }
        }

        config
    }
}

/// Channel sizes must be non-zero.
fn parse_positive(value: &str, key: &str) -> Option<usize> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!(key, value, "Invalid value, using default");
            None
        }
    }
}
