//! Controller configuration (TOML).
//!
//! Every field has a default, so an empty document yields the built-in
//! four-tier ladder with the standard thresholds:
//!
//! ```toml
//! initial_mode = "auto"
//! initial_tier = "free"
//! monitor_interval = "30s"
//!
//! [thresholds]
//! token_usage = 0.8
//! error_rate = 0.05
//! response_time_ms = 5000
//!
//! [[tier]]
//! name = "free"
//! max_tokens = 100000
//! max_teams = 5
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::tier::{Tier, TierLadder};
use crate::types::ScalingMode;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerConfig {
    #[serde(default = "default_mode")]
    pub initial_mode: ScalingMode,
    #[serde(default = "default_initial_tier")]
    pub initial_tier: String,
    /// Monitoring tick interval (e.g. "30s", "1m", "500ms").
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval: String,
    /// Maximum scaling records kept in memory.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub cache: CacheConfig,
    /// The ladder, lowest tier first.
    #[serde(default = "default_tiers", rename = "tier")]
    pub tiers: Vec<Tier>,
}

/// Scaling thresholds. Scale-up thresholds are inclusive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Thresholds {
    /// Token usage ratio (current / tier max) that triggers a scale up.
    pub token_usage: f64,
    /// Error rate that triggers a scale up.
    pub error_rate: f64,
    /// Response time (ms) that triggers a scale up.
    pub response_time_ms: u64,
    /// Average usage ratio against the lower tier below which we scale down.
    pub scale_down_usage: f64,
    /// Trailing window for the scale-down average.
    pub scale_down_window_days: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            token_usage: 0.8,
            error_rate: 0.05,
            response_time_ms: 5000,
            scale_down_usage: 0.6,
            scale_down_window_days: 7,
        }
    }
}

/// Where and for how long the current tier is mirrored in the cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub key: String,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key: "current_tier".to_string(),
            ttl_secs: 3600,
        }
    }
}

fn default_mode() -> ScalingMode {
    ScalingMode::Auto
}

fn default_initial_tier() -> String {
    "free".to_string()
}

fn default_monitor_interval() -> String {
    "30s".to_string()
}

fn default_history_capacity() -> usize {
    100
}

fn default_tiers() -> Vec<Tier> {
    TierLadder::standard().tiers().to_vec()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            initial_mode: default_mode(),
            initial_tier: default_initial_tier(),
            monitor_interval: default_monitor_interval(),
            history_capacity: default_history_capacity(),
            thresholds: Thresholds::default(),
            cache: CacheConfig::default(),
            tiers: default_tiers(),
        }
    }
}

impl ControllerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: ControllerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check the ladder, initial tier, thresholds, and interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ladder = self.ladder()?;
        if !ladder.contains(&self.initial_tier) {
            return Err(ConfigError::UnknownInitialTier(self.initial_tier.clone()));
        }
        for (name, value) in [
            ("token_usage", self.thresholds.token_usage),
            ("error_rate", self.thresholds.error_rate),
            ("scale_down_usage", self.thresholds.scale_down_usage),
        ] {
            if !value.is_finite() || value <= 0.0 || value > 1.0 {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::ZeroHistoryCapacity);
        }
        self.interval()?;
        Ok(())
    }

    /// Build the tier ladder from the configured tiers.
    pub fn ladder(&self) -> Result<TierLadder, ConfigError> {
        TierLadder::new(self.tiers.clone())
    }

    /// The parsed monitoring interval.
    pub fn interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.monitor_interval)
    }
}

/// Parse a duration string like "500ms", "30s", "5m". A bare number is
/// read as seconds. Zero is rejected.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let invalid = || ConfigError::InvalidDuration(s.to_string());
    let duration = if let Some(ms) = s.strip_suffix("ms") {
        Duration::from_millis(ms.parse().map_err(|_| invalid())?)
    } else if let Some(secs) = s.strip_suffix('s') {
        Duration::from_secs(secs.parse().map_err(|_| invalid())?)
    } else if let Some(mins) = s.strip_suffix('m') {
        let mins: u64 = mins.parse().map_err(|_| invalid())?;
        Duration::from_secs(mins.checked_mul(60).ok_or_else(invalid)?)
    } else {
        Duration::from_secs(s.parse().map_err(|_| invalid())?)
    };
    if duration.is_zero() {
        return Err(invalid());
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = ControllerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.interval().unwrap(), Duration::from_secs(30));
        assert_eq!(config.ladder().unwrap().len(), 4);
        assert_eq!(config.history_capacity, 100);
        assert_eq!(config.cache.ttl_secs, 3600);
    }

    #[test]
    fn parse_custom_ladder() {
        let toml_str = r#"
initial_mode = "manual"
initial_tier = "small"
monitor_interval = "5s"

[thresholds]
token_usage = 0.9

[[tier]]
name = "small"
max_tokens = 1000
max_teams = 1

[[tier]]
name = "large"
max_tokens = 10000
max_teams = 10
monthly_cost = 25.5
capabilities = ["sso"]
"#;
        let config = ControllerConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.initial_mode, ScalingMode::Manual);
        assert_eq!(config.thresholds.token_usage, 0.9);
        assert_eq!(config.thresholds.error_rate, 0.05);
        let ladder = config.ladder().unwrap();
        assert_eq!(ladder.next("small").unwrap().name, "large");
        assert!(ladder.get("large").unwrap().capabilities.contains("sso"));
    }

    #[test]
    fn rejects_unknown_initial_tier() {
        let err = ControllerConfig::from_toml_str("initial_tier = \"gold\"").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownInitialTier(t) if t == "gold"));
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let err = ControllerConfig::from_toml_str("[thresholds]\nerror_rate = 1.5").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThreshold { name: "error_rate", .. }));
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!(ControllerConfig::from_toml_str("initial_mode = \"turbo\"").is_err());
    }

    #[test]
    fn roundtrips_through_toml() {
        let config = ControllerConfig::default();
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("enterprise"));
        assert_eq!(ControllerConfig::from_toml_str(&rendered).unwrap(), config);
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("12").unwrap(), Duration::from_secs(12));
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn huge_minute_interval_is_rejected() {
        assert!(matches!(
            parse_duration("307445734561825861m"),
            Err(ConfigError::InvalidDuration(_))
        ));
        let err =
            ControllerConfig::from_toml_str("monitor_interval = \"307445734561825861m\"").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration(_)));
    }
}
