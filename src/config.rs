//! Engine configuration
//!
//! Loaded from a TOML file, e.g.
//!
//! ```toml
//! dialect = "sqlite"
//! log_filter = "atquery=debug"
//!
//! [limits]
//! max_scan_items = 100000
//! max_result_rows = 5000
//! ```
//!
//! ## Environment Variables
//!
//! The following environment variables override config file settings:
//!
//! - `ATQUERY_DIALECT` - SQL dialect (`postgres` or `sqlite`)
//! - `ATQUERY_MAX_SCAN_ITEMS` - Source items a collection at-expression may scan
//! - `ATQUERY_MAX_RESULT_ROWS` - Rows a database at-expression may fetch
//! - `ATQUERY_LOG` - Default tracing filter
//!
//! These can be set in a `.env` file next to the config file.

use std::path::Path;

use atquery_core::{QueryLimits, SqlDialect};
use serde::{Deserialize, Serialize};

use crate::error::QueryResult;

/// Environment variable names
pub const ENV_DIALECT: &str = "ATQUERY_DIALECT";
pub const ENV_MAX_SCAN_ITEMS: &str = "ATQUERY_MAX_SCAN_ITEMS";
pub const ENV_MAX_RESULT_ROWS: &str = "ATQUERY_MAX_RESULT_ROWS";
pub const ENV_LOG: &str = "ATQUERY_LOG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SQL flavour of generated statements
    pub dialect: SqlDialect,
    pub limits: QueryLimits,
    /// Tracing filter used when `RUST_LOG` is not set
    pub log_filter: String,
}

fn default_log_filter() -> String {
    "atquery=info,atquery_core=info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dialect: SqlDialect::default(),
            limits: QueryLimits::default(),
            log_filter: default_log_filter(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document. Environment overrides are not applied.
    pub fn from_toml_str(content: &str) -> QueryResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a file
    ///
    /// This also loads any `.env` file in the same directory and applies
    /// environment variable overrides.
    pub fn load(path: &Path) -> QueryResult<Self> {
        if let Some(dir) = path.parent() {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
            }
        }

        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Unparseable or empty values leave the setting unchanged.
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dialect) = lookup(ENV_DIALECT) {
            if let Ok(dialect) = dialect.parse::<SqlDialect>() {
                self.dialect = dialect;
            }
        }

        if let Some(max) = lookup(ENV_MAX_SCAN_ITEMS) {
            if let Ok(max) = max.parse::<usize>() {
                self.limits.max_scan_items = max;
            }
        }

        if let Some(max) = lookup(ENV_MAX_RESULT_ROWS) {
            if let Ok(max) = max.parse::<usize>() {
                self.limits.max_result_rows = max;
            }
        }

        if let Some(filter) = lookup(ENV_LOG) {
            if !filter.is_empty() {
                self.log_filter = filter;
            }
        }
    }
}
