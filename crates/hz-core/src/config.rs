//! Controller configuration
//!
//! Persistence is a collaborator: anything implementing [`ConfigStore`]
//! can load and save a [`Config`]. Missing fields take their defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pattern::PatternSet;
use crate::placement::{LadderOptions, ScaleToken};
use crate::types::Size;

/// Border, padding and margin of the popup box, summed per axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Extents {
    pub horizontal: f64,
    pub vertical: f64,
}

impl Default for Extents {
    fn default() -> Self {
        Self {
            horizontal: 20.0,
            vertical: 20.0,
        }
    }
}

impl Extents {
    pub fn size(&self) -> Size {
        Size::new(self.horizontal, self.vertical)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Delay between hover and display.
    pub start_delay_ms: u64,
    /// Start fetching while the delay runs.
    pub preload_during_delay: bool,
    /// Pointer movement during the delay restarts a window of this length.
    pub settle_ms: u64,
    /// Auto ladder multiplier.
    pub zoom_step: f64,
    /// Explicit ladder tokens (`"0.5"`, `"fit"`, `"1!"`, `"2*"`); empty for auto.
    pub scales: Vec<String>,
    pub enlarge_small: bool,
    /// Wheel navigates an unzoomed gallery instead of zooming.
    pub wheel_gallery: bool,
    /// Zooming out of an unzoomed popup closes it.
    pub zoom_out_closes: bool,
    /// Minimum natural/rendered ratio for a media element to get a popup.
    pub scale_threshold: f64,
    /// Gallery items preloaded in the travel direction.
    pub preload_ahead: usize,
    /// Hosts whose assets are retried through a same-origin fetch.
    pub xhr_retry_hosts: Vec<String>,
    /// Gallery assets below this size count as failures.
    pub min_asset_bytes: u64,
    pub request_timeout_ms: u64,
    pub popup_extents: Extents,
    /// User rules as JSON text.
    pub custom_rules: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            start_delay_ms: 500,
            preload_during_delay: false,
            settle_ms: 0,
            zoom_step: 1.25,
            scales: Vec::new(),
            enlarge_small: false,
            wheel_gallery: true,
            zoom_out_closes: false,
            scale_threshold: 1.25,
            preload_ahead: 1,
            xhr_retry_hosts: Vec::new(),
            min_asset_bytes: 512,
            request_timeout_ms: 30_000,
            popup_extents: Extents::default(),
            custom_rules: String::new(),
        }
    }
}

/// Error type for configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot access config: {0}")]
    Io(String),
    #[error("cannot parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Check values the controller relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.zoom_step.is_finite() && self.zoom_step > 1.0) {
            return Err(ConfigError::Invalid(format!("zoom_step must be > 1, got {}", self.zoom_step)));
        }
        if let Some(bad) = self.scales.iter().find(|t| ScaleToken::parse(t).is_none()) {
            return Err(ConfigError::Invalid(format!("bad scale token '{bad}'")));
        }
        if !self.xhr_retry_hosts.is_empty() {
            PatternSet::compile(&self.xhr_retry_hosts)
                .map_err(|e| ConfigError::Invalid(format!("xhr_retry_hosts: {e}")))?;
        }
        if !self.scale_threshold.is_finite() || self.scale_threshold < 0.0 {
            return Err(ConfigError::Invalid("scale_threshold must be >= 0".to_string()));
        }
        Ok(())
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Ladder options; unparsable tokens are skipped.
    pub fn ladder_options(&self) -> LadderOptions {
        LadderOptions {
            zoom_step: self.zoom_step,
            tokens: self.scales.iter().filter_map(|t| ScaleToken::parse(t)).collect(),
            enlarge_small: self.enlarge_small,
        }
    }

    /// Compiled `xhr_retry_hosts`, if any are valid.
    pub fn xhr_retry_patterns(&self) -> Option<PatternSet> {
        if self.xhr_retry_hosts.is_empty() {
            return None;
        }
        PatternSet::compile(&self.xhr_retry_hosts).ok()
    }
}

/// Persistence collaborator.
pub trait ConfigStore {
    fn load(&self) -> Result<Config, ConfigError>;
    fn save(&self, config: &Config) -> Result<(), ConfigError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct MemoryStore {
        saved: RefCell<Option<String>>,
    }

    impl ConfigStore for MemoryStore {
        fn load(&self) -> Result<Config, ConfigError> {
            match self.saved.borrow().as_deref() {
                Some(json) => serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string())),
                None => Ok(Config::default()),
            }
        }

        fn save(&self, config: &Config) -> Result<(), ConfigError> {
            let json = serde_json::to_string(config).map_err(|e| ConfigError::Io(e.to_string()))?;
            *self.saved.borrow_mut() = Some(json);
            Ok(())
        }
    }

    #[test]
    fn store_round_trip() {
        let store = MemoryStore::default();
        assert_eq!(store.load().unwrap(), Config::default());

        let config = Config {
            start_delay_ms: 0,
            scales: vec!["1!".into(), "2*".into()],
            ..Config::default()
        };
        store.save(&config).unwrap();
        assert_eq!(store.load().unwrap(), config);
    }

    #[test]
    fn missing_fields_default() {
        let config: Config = serde_json::from_str(r#"{"zoom_step": 2.0}"#).unwrap();
        assert_eq!(config.zoom_step, 2.0);
        assert_eq!(config.start_delay_ms, Config::default().start_delay_ms);
    }

    #[test]
    fn validation() {
        assert!(Config::default().validate().is_ok());
        let bad_step = Config {
            zoom_step: 1.0,
            ..Config::default()
        };
        assert!(bad_step.validate().is_err());
        let bad_scale = Config {
            scales: vec!["big".into()],
            ..Config::default()
        };
        assert!(matches!(bad_scale.validate(), Err(ConfigError::Invalid(_))));
        let bad_hosts = Config {
            xhr_retry_hosts: vec!["||".into()],
            ..Config::default()
        };
        assert!(bad_hosts.validate().is_err());
    }
}
