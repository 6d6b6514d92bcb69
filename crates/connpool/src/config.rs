//! Pool configuration and its TOML form.
//!
//! ```toml
//! [pool]
//! ttl = "30s"      # idle expiry and connect bound
//! delay = "50ms"   # pause between back-to-back requests
//! ```
//!
//! Durations accept `ms`, `s` and `m` suffixes; a bare number is seconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Settings fixed for the lifetime of a [`Pool`](crate::Pool).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Idle time after which the connection is closed. Also bounds how long
    /// the factory may take to open a connection (default: 30s).
    pub ttl: Duration,
    /// Pause after each non-fatal request before the next one is accepted
    /// (default: none).
    pub delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            delay: Duration::ZERO,
        }
    }
}

impl PoolConfig {
    pub fn with_ttl(self, ttl: Duration) -> Self {
        Self { ttl, ..self }
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl.is_zero() {
            return Err(ConfigError::ZeroTtl);
        }
        Ok(())
    }

    /// Parse the `[pool]` table of a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        let section = file.pool.unwrap_or_default();

        let mut config = Self::default();
        if let Some(ttl) = section.ttl {
            config.ttl = parse_field("ttl", &ttl)?;
        }
        if let Some(delay) = section.delay {
            config.delay = parse_field("delay", &delay)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

/// The `[pool]` table as written in TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolSection {
    pub ttl: Option<String>,
    pub delay: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    pool: Option<PoolSection>,
}

fn parse_field(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::Duration {
        field,
        value: value.to_string(),
    })
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(30));
        assert_eq!(config.delay, Duration::ZERO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_methods_chain() {
        let config = PoolConfig::default()
            .with_ttl(Duration::from_secs(5))
            .with_delay(Duration::from_millis(20));
        assert_eq!(config.ttl, Duration::from_secs(5));
        assert_eq!(config.delay, Duration::from_millis(20));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration(" 0ms "), Some(Duration::ZERO));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn parse_duration_rejects_overflowing_minutes() {
        assert_eq!(parse_duration("999999999999999999m"), None);
        let err = PoolConfig::from_toml_str("[pool]\nttl = \"999999999999999999m\"").unwrap_err();
        assert!(matches!(err, ConfigError::Duration { field: "ttl", .. }));
    }

    #[test]
    fn from_toml_reads_pool_table() {
        let config = PoolConfig::from_toml_str(
            r#"
            [pool]
            ttl = "90s"
            delay = "250ms"
            "#,
        )
        .unwrap();
        assert_eq!(config.ttl, Duration::from_secs(90));
        assert_eq!(config.delay, Duration::from_millis(250));
    }

    #[test]
    fn from_toml_missing_table_uses_defaults() {
        let config = PoolConfig::from_toml_str("").unwrap();
        assert_eq!(config, PoolConfig::default());
    }

    #[test]
    fn from_toml_rejects_bad_duration() {
        let err = PoolConfig::from_toml_str("[pool]\nttl = \"forever\"").unwrap_err();
        assert!(matches!(err, ConfigError::Duration { field: "ttl", .. }));
    }

    #[test]
    fn from_toml_rejects_zero_ttl() {
        let err = PoolConfig::from_toml_str("[pool]\nttl = \"0s\"").unwrap_err();
        assert!(matches!(err, ConfigError::ZeroTtl));
    }

    #[test]
    fn from_toml_rejects_malformed_document() {
        let err = PoolConfig::from_toml_str("[pool\nttl =").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn from_file_missing_path() {
        let err = PoolConfig::from_file(Path::new("/nonexistent/connpool.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read(_)));
    }
}
