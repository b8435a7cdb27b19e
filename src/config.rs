//! Service configuration and its discovery.
//!
//! Lookup order:
//! 1. An explicit `--config` path
//! 2. Current directory: `./sts.toml`
//! 3. User config: `~/.sts/config.toml`
//! 4. Built-in defaults
//!
//! Environment variables (`HOST`, `PORT`, `ENV`, `CORS_ALLOWED_ORIGINS`,
//! `UPLOAD_MAX_BYTES`, `STS_ENGINE`) are applied on top of whichever source
//! won.

use crate::env::{self, engine, upload};
use serde::{Deserialize, Serialize};
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Deployment mode. Development relaxes the WebSocket origin check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    #[default]
    Prod,
}

impl Environment {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Some(Environment::Dev),
            "prod" | "production" => Some(Environment::Prod),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    /// Extra origins accepted on WebSocket upgrades
    pub allowed_origins: Vec<String>,
    pub upload_max_bytes: u64,
    pub engine_program: String,
    pub custom_images_dir: PathBuf,
    pub name_prefix: String,
    pub management_label: String,
    /// JSON snapshot of container records; in-memory only when unset
    pub records_path: Option<PathBuf>,
    pub reap_interval_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            environment: Environment::default(),
            allowed_origins: Vec::new(),
            upload_max_bytes: upload::DEFAULT_MAX_BYTES,
            engine_program: env::DEFAULT_ENGINE_PROGRAM.to_string(),
            custom_images_dir: PathBuf::from(engine::DEFAULT_CUSTOM_IMAGES_DIR),
            name_prefix: engine::DEFAULT_NAME_PREFIX.to_string(),
            management_label: engine::DEFAULT_MANAGEMENT_LABEL.to_string(),
            records_path: None,
            reap_interval_secs: 5,
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }

    pub fn is_dev(&self) -> bool {
        self.environment == Environment::Dev
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std_env::var(key).ok())
    }

    /// Apply overrides from any key lookup. Empty values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("HOST") {
            self.host = host;
        }
        if let Some(port) = get("PORT") {
            self.port = port.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "PORT",
                value: port.clone(),
            })?;
        }
        if let Some(mode) = get("ENV") {
            self.environment = Environment::parse(&mode).ok_or(ConfigError::InvalidValue {
                key: "ENV",
                value: mode.clone(),
            })?;
        }
        if let Some(origins) = get("CORS_ALLOWED_ORIGINS") {
            self.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(max) = get("UPLOAD_MAX_BYTES") {
            self.upload_max_bytes =
                max.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: "UPLOAD_MAX_BYTES",
                        value: max.clone(),
                    })?;
        }
        if let Some(engine) = get("STS_ENGINE") {
            self.engine_program = engine;
        }
        Ok(())
    }
}

/// Configuration file discovery.
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Load configuration from `explicit` or the discovery hierarchy, then
    /// apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<ServiceConfig, ConfigError> {
        let mut config = match explicit {
            Some(path) => {
                info!("Loading configuration from: {:?}", path);
                ServiceConfig::from_toml_file(path)?
            }
            None => Self::discover_config()?,
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn discover_config() -> Result<ServiceConfig, ConfigError> {
        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", config_path);
            return ServiceConfig::from_toml_file(config_path);
        }

        info!("No configuration file found, using defaults");
        Ok(ServiceConfig::default())
    }

    pub fn find_config_file() -> Option<PathBuf> {
        Self::config_candidates().into_iter().find(|candidate| {
            debug!("Checking for config file: {:?}", candidate);
            candidate.is_file()
        })
    }

    fn config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(current_dir.join(env::LOCAL_CONFIG_FILE_NAME));
        }

        match Self::home_dir() {
            Some(home) => candidates.push(
                home.join(env::USER_CONFIG_DIR_NAME)
                    .join(env::USER_CONFIG_FILE_NAME),
            ),
            None => warn!("HOME is not set, skipping user configuration"),
        }

        candidates
    }

    fn home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServiceConfig::default();
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.upload_max_bytes, 10 * 1024 * 1024);
        assert_eq!(config.management_label, "managed_by=simple-test-server");
        assert!(!config.is_dev());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sts.toml");
        fs::write(&path, "port = 9000\nenvironment = \"dev\"\n").unwrap();

        let config = ServiceConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.port, 9000);
        assert!(config.is_dev());
        assert_eq!(config.engine_program, "docker");
    }

    #[test]
    fn serialization_round_trips() {
        let config = ServiceConfig {
            records_path: Some(PathBuf::from("/var/lib/sts/records.json")),
            ..Default::default()
        };
        let text = config.to_toml_string().unwrap();
        let parsed: ServiceConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn environment_overrides_win() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PORT", "3000"),
            ("ENV", "DEV"),
            ("CORS_ALLOWED_ORIGINS", "http://a.test, http://b.test,"),
            ("UPLOAD_MAX_BYTES", "1024"),
            ("STS_ENGINE", "podman"),
            ("HOST", ""),
        ]);
        let mut config = ServiceConfig::default();
        config
            .apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.port, 3000);
        assert!(config.is_dev());
        assert_eq!(config.allowed_origins, vec!["http://a.test", "http://b.test"]);
        assert_eq!(config.upload_max_bytes, 1024);
        assert_eq!(config.engine_program, "podman");
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn bad_port_is_reported() {
        let mut config = ServiceConfig::default();
        let err = config
            .apply_overrides_from(|key| (key == "PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "PORT", .. }));
    }

    #[test]
    fn local_file_is_first_candidate() {
        let candidates = ConfigDiscovery::config_candidates();
        assert_eq!(candidates[0].file_name().unwrap(), "sts.toml");
    }
}
