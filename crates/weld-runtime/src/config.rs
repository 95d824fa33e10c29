//! Configuration loading.
//!
//! Sources merge in increasing precedence: built-in defaults, the first
//! `weld.toml` found on the search path, then `WELD_*` environment
//! variables (nested keys split on `__`, e.g. `WELD_CORS__MAX_AGE`).

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use tracing::{debug, info};

use weld_core::{ServerConfig, SetupError, SetupResult};

const CONFIG_NAMES: &[&str] = &["weld.toml", ".weld.toml"];

/// Configuration loader with a file search path.
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Creates a loader with no search paths.
    pub fn new() -> Self {
        Self {
            search_paths: Vec::new(),
        }
    }

    /// Adds a search path for configuration files.
    pub fn add_search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds the current directory to search paths.
    pub fn with_current_dir(self) -> Self {
        if let Ok(cwd) = std::env::current_dir() {
            self.add_search_path(cwd)
        } else {
            self
        }
    }

    /// Adds the user config directory to search paths.
    pub fn with_user_config_dir(self) -> Self {
        if let Some(config_dir) = dirs::config_dir() {
            self.add_search_path(config_dir.join("weld"))
        } else {
            self
        }
    }

    /// Loads configuration from defaults, the first file found, and the
    /// environment.
    pub fn load(&self) -> SetupResult<ServerConfig> {
        let mut figment = Figment::from(Serialized::defaults(ServerConfig::default()));
        if let Some(path) = self.find_config_file() {
            figment = figment.merge(Toml::file(path));
        }
        let config: ServerConfig = figment
            .merge(Env::prefixed("WELD_").split("__"))
            .extract()
            .map_err(|e| SetupError::Config(e.to_string()))?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Loads configuration from a specific file plus the environment.
    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> SetupResult<ServerConfig> {
        let path = path.as_ref();
        info!("loading configuration from {}", path.display());
        if !path.exists() {
            return Err(SetupError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let config: ServerConfig = Figment::from(Serialized::defaults(ServerConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("WELD_").split("__"))
            .extract()
            .map_err(|e| SetupError::Config(e.to_string()))?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Loads configuration from a TOML string. Used by tests.
    pub fn load_from_str(&self, toml: &str) -> SetupResult<ServerConfig> {
        let config: ServerConfig = Figment::from(Serialized::defaults(ServerConfig::default()))
            .merge(Toml::string(toml))
            .extract()
            .map_err(|e| SetupError::Config(e.to_string()))?;
        validate_config(&config)?;
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        for search_path in &self.search_paths {
            for name in CONFIG_NAMES {
                let path = search_path.join(name);
                debug!("checking for config file: {}", path.display());
                if path.exists() {
                    info!("found configuration file: {}", path.display());
                    return Some(path);
                }
            }
        }
        None
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new().with_current_dir().with_user_config_dir()
    }
}

/// Convenience function to load configuration with default settings.
pub fn load_config() -> SetupResult<ServerConfig> {
    ConfigLoader::default().load()
}

/// Rejects configurations the server cannot run with.
pub fn validate_config(config: &ServerConfig) -> SetupResult<()> {
    if config.max_message_size == 0 {
        return Err(SetupError::Config(
            "max_message_size must be greater than zero".into(),
        ));
    }
    if config.cors.allowed_origins.is_empty() {
        return Err(SetupError::Config(
            "cors.allowed_origins must not be empty (use [\"*\"] to allow any)".into(),
        ));
    }
    if let Some(path) = &config.health_check_path {
        if !path.starts_with('/') {
            return Err(SetupError::Config(format!(
                "health_check_path must begin with '/': '{path}'"
            )));
        }
    }
    if config.queue_file.is_empty() {
        return Err(SetupError::Config("queue_file must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = ConfigLoader::new().load_from_str("").unwrap();
        assert_eq!(config.port, 6001);
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn toml_overrides_defaults() {
        let config = ConfigLoader::new()
            .load_from_str(
                r#"
port = 7002
debug = true
auth_key = "s3cret"

[cors]
allowed_origins = ["https://a.example"]
allow_credentials = true
"#,
            )
            .unwrap();
        assert_eq!(config.port, 7002);
        assert!(config.debug);
        assert_eq!(config.auth_key.as_deref(), Some("s3cret"));
        assert_eq!(config.cors.allowed_origins, vec!["https://a.example"]);
        assert!(config.cors.allow_credentials);
        assert_eq!(config.max_message_size, 65536);
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(ConfigLoader::new()
            .load_from_str("max_message_size = 0")
            .is_err());
        assert!(ConfigLoader::new()
            .load_from_str("[cors]\nallowed_origins = []")
            .is_err());
        assert!(ConfigLoader::new()
            .load_from_str("health_check_path = \"health\"")
            .is_err());
    }
}
