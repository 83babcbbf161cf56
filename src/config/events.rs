//! Event configuration loading from config.toml
//!
//! This module provides functionality to load event definitions from a TOML
//! configuration file. The events defined in config.toml are used to seed the
//! database on first run; events that already exist (by code) are left untouched.

use crate::errors::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// List of events to seed
    #[serde(default)]
    pub events: Vec<EventConfig>,
}

/// Configuration for a single event
#[derive(Debug, Deserialize, Clone)]
pub struct EventConfig {
    /// Unique event code
    pub code: String,
    /// Display name
    pub name: String,
    /// Campaign window start (RFC 3339)
    pub starts_at: DateTime<Utc>,
    /// Campaign window end (RFC 3339)
    pub ends_at: DateTime<Utc>,
    /// Public window start, defaults to `starts_at`
    #[serde(default)]
    pub public_starts_at: Option<DateTime<Utc>>,
    /// Public window end, defaults to `ends_at`
    #[serde(default)]
    pub public_ends_at: Option<DateTime<Utc>>,
    /// Whether the seeded event should be activated right away
    #[serde(default)]
    pub activate: bool,
    /// User ids granted the staff role in this event
    #[serde(default)]
    pub staff: Vec<String>,
}

/// Loads event configuration from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - Required fields are missing or timestamps are malformed
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
        message: format!("Failed to read config file: {e}"),
    })?;

    parse_config(&contents)
}

/// Parses event configuration from TOML text.
pub fn parse_config(contents: &str) -> Result<Config> {
    toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })
}

/// Loads event configuration from the default location (./config.toml).
///
/// A missing file is not an error: it yields an empty configuration.
pub fn load_default_config() -> Result<Config> {
    let path = Path::new("config.toml");
    if !path.exists() {
        tracing::debug!("No config.toml found, nothing to seed");
        return Ok(Config::default());
    }
    load_config(path)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_parse_event_config() {
        let toml_str = r#"
            [[events]]
            code = "FERIA-2026"
            name = "Feria de primavera"
            starts_at = "2026-03-01T08:00:00Z"
            ends_at = "2026-03-03T22:00:00Z"
            public_starts_at = "2026-03-01T10:00:00Z"
            activate = true
            staff = ["staff-1", "staff-2"]

            [[events]]
            code = "DRAFT"
            name = "Draft event"
            starts_at = "2026-05-01T08:00:00Z"
            ends_at = "2026-05-02T08:00:00Z"
        "#;

        let config = parse_config(toml_str).unwrap();
        assert_eq!(config.events.len(), 2);
        assert_eq!(config.events[0].code, "FERIA-2026");
        assert!(config.events[0].activate);
        assert_eq!(config.events[0].staff, vec!["staff-1", "staff-2"]);
        assert!(config.events[0].public_starts_at.is_some());
        assert!(config.events[0].public_ends_at.is_none());

        assert!(!config.events[1].activate);
        assert!(config.events[1].staff.is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_timestamp() {
        let toml_str = r#"
            [[events]]
            code = "X"
            name = "X"
            starts_at = "yesterday"
            ends_at = "2026-05-02T08:00:00Z"
        "#;
        assert!(matches!(parse_config(toml_str), Err(Error::Config { .. })));
    }

    #[test]
    fn test_empty_config() {
        let config = parse_config("").unwrap();
        assert!(config.events.is_empty());
    }
}
