//!
//! tablescout configuration
//! ------------------------
//! Connector settings arrive as a flat string-keyed property map (the shape the host
//! runtime hands to every connector). `SourceConfig::from_props` validates the keys the
//! connector itself consumes; every other key is carried forward untouched into each
//! worker configuration record.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde_json::Value as JsonValue;

use crate::catalog::TableFilter;
use crate::error::{ConnectorError, ConnectorResult};

/// Flat connector/task properties. Ordered so emitted task configs are reproducible.
pub type ConnectorProps = BTreeMap<String, String>;

pub const CONNECTION_URL_CONFIG: &str = "connection.url";
pub const TABLE_POLL_INTERVAL_MS_CONFIG: &str = "table.poll.interval.ms";
pub const TABLE_POLL_INTERVAL_MS_DEFAULT: u64 = 60_000;
pub const SCHEMA_PATTERN_CONFIG: &str = "schema.pattern";
pub const TABLE_WHITELIST_CONFIG: &str = "table.whitelist";
pub const TABLE_BLACKLIST_CONFIG: &str = "table.blacklist";
/// Key added to every worker configuration: the worker's tables joined with `TABLES_DELIMITER`.
pub const TABLES_CONFIG: &str = "tables";
pub const TABLES_DELIMITER: &str = ",";

/// Environment variable that overrides `table.poll.interval.ms` when loading from a file.
pub const POLL_INTERVAL_ENV: &str = "TABLESCOUT_POLL_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub connection_url: String,
    pub poll_interval: Duration,
    pub table_filter: TableFilter,
}

impl SourceConfig {
    pub fn from_props(props: &ConnectorProps) -> ConnectorResult<Self> {
        let connection_url = match props.get(CONNECTION_URL_CONFIG).map(|s| s.trim()) {
            Some(u) if !u.is_empty() => u.to_string(),
            _ => {
                return Err(ConnectorError::config(
                    "missing_key".to_string(),
                    format!("{} is required", CONNECTION_URL_CONFIG),
                ))
            }
        };

        let poll_ms = match props.get(TABLE_POLL_INTERVAL_MS_CONFIG) {
            None => TABLE_POLL_INTERVAL_MS_DEFAULT,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(0) | Err(_) => {
                    return Err(ConnectorError::config(
                        "invalid_value".to_string(),
                        format!("{} must be a positive integer, got '{}'", TABLE_POLL_INTERVAL_MS_CONFIG, raw),
                    ))
                }
                Ok(v) => v,
            },
        };

        let schema_pattern = props
            .get(SCHEMA_PATTERN_CONFIG)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let whitelist = props.get(TABLE_WHITELIST_CONFIG).map(|s| split_list(s));
        let blacklist = props.get(TABLE_BLACKLIST_CONFIG).map(|s| split_list(s));
        if whitelist.is_some() && blacklist.is_some() {
            return Err(ConnectorError::config(
                "conflicting_keys".to_string(),
                format!("{} and {} cannot both be set", TABLE_WHITELIST_CONFIG, TABLE_BLACKLIST_CONFIG),
            ));
        }

        Ok(Self {
            connection_url,
            poll_interval: Duration::from_millis(poll_ms),
            table_filter: TableFilter { schema_pattern, whitelist, blacklist },
        })
    }
}

/// Split a comma separated list, trimming entries and dropping empty ones.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Load connector properties from a JSON object file.
/// Scalar values (strings, numbers, booleans) are accepted and stored as strings.
pub fn load_props_file(path: &Path) -> ConnectorResult<ConnectorProps> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ConnectorError::config("unreadable_file".to_string(), format!("{}: {}", path.display(), e))
    })?;
    parse_props_json(&text)
}

pub fn parse_props_json(text: &str) -> ConnectorResult<ConnectorProps> {
    let v: JsonValue = serde_json::from_str(text)
        .map_err(|e| ConnectorError::config("invalid_json".to_string(), e.to_string()))?;
    let obj = match v {
        JsonValue::Object(m) => m,
        _ => return Err(ConnectorError::config("invalid_json", "properties must be a JSON object")),
    };
    let mut props = ConnectorProps::new();
    for (k, v) in obj {
        let s = match v {
            JsonValue::String(s) => s,
            JsonValue::Number(n) => n.to_string(),
            JsonValue::Bool(b) => b.to_string(),
            other => {
                return Err(ConnectorError::config(
                    "invalid_value".to_string(),
                    format!("property '{}' must be a scalar, got {}", k, other),
                ))
            }
        };
        props.insert(k, s);
    }
    Ok(props)
}

/// Apply environment overrides on top of file-loaded properties.
pub fn apply_env_overrides(props: &mut ConnectorProps) {
    apply_overrides(props, |name| std::env::var(name).ok());
}

pub(crate) fn apply_overrides<F: Fn(&str) -> Option<String>>(props: &mut ConnectorProps, lookup: F) {
    if let Some(ms) = lookup(POLL_INTERVAL_ENV) {
        props.insert(TABLE_POLL_INTERVAL_MS_CONFIG.to_string(), ms);
    }
}
