//! Runtime configuration.
//!
//! Values come from the environment, optionally seeded from a `.env` file in
//! the working directory:
//!
//! - `ROSTERD_WORKSPACE`: workspace folder to open at startup.
//! - `ROSTERD_LOG`: default log filter, used when `RUST_LOG` is unset.

use std::path::PathBuf;

const WORKSPACE_VAR: &str = "ROSTERD_WORKSPACE";
const LOG_VAR: &str = "ROSTERD_LOG";

/// Filter used when neither `RUST_LOG` nor `ROSTERD_LOG` is set.
const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        // Missing .env is the common case.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();
        Self {
            workspace: non_empty(WORKSPACE_VAR).map(PathBuf::from),
            log_filter: non_empty(LOG_VAR).unwrap_or(defaults.log_filter),
        }
    }
}
