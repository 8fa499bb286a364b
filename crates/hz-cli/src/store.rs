use std::fs;
use std::path::PathBuf;

use hz_core::config::{Config, ConfigError, ConfigStore};

/// Config persisted as a TOML file.
pub struct TomlStore {
    path: PathBuf,
}

impl TomlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/hoverzoom/config.toml`.
    pub fn default_path() -> PathBuf {
        let mut root = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        root.push("hoverzoom");
        root.push("config.toml");
        root
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

impl ConfigStore for TomlStore {
    /// A missing file yields the defaults.
    fn load(&self) -> Result<Config, ConfigError> {
        if !self.path.exists() {
            return Ok(Config::default());
        }
        let raw = fs::read_to_string(&self.path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", self.path.display(), e)))?;
        let config: Config = toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn save(&self, config: &Config) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }
        let raw = toml::to_string_pretty(config).map_err(|e| ConfigError::Parse(e.to_string()))?;
        fs::write(&self.path, raw).map_err(|e| ConfigError::Io(format!("{}: {}", self.path.display(), e)))
    }
}
