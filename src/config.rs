//! Broker configuration files.
//!
//! Both brokers read a key/value text file (TOML) whose keys keep the
//! operational names the platform has always used (`Id`, `Listen`, `Port`,
//! `Timeout`, `LogFile`, ...). The scheduler additionally names its routing
//! database; the mo-broker names the Redis cache its stats sampler writes
//! to. A missing file or missing key is a startup failure.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't open the {path} configuration file: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("can't parse the {path} configuration file: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid {key} port number")]
    InvalidPort { key: &'static str },
}

fn read_config_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })
}

fn parse_config<T: for<'de> Deserialize<'de>>(path: &Path, text: &str) -> Result<T, ConfigError> {
    toml::from_str(text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn check_port(key: &'static str, port: u16) -> Result<(), ConfigError> {
    if port == 0 {
        return Err(ConfigError::InvalidPort { key });
    }
    Ok(())
}

/// Scheduler (MT dispatch) configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SchedulerConfig {
    pub id: u32,
    pub debug: bool,
    pub listen: String,
    pub port: u16,
    /// Session receive timeout in milliseconds.
    pub timeout: u64,
    pub log_file: String,
    #[serde(default)]
    pub ac: Option<String>,
    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
}

impl SchedulerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config: Self = parse_config(path, &read_config_file(path)?)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_port("Port", self.port)?;
        check_port("DbPort", self.db_port)?;
        Ok(())
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// First port of the per-session scan range.
    pub fn session_base_port(&self) -> u16 {
        self.port.saturating_add(1)
    }
}

/// MO broker configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MoConfig {
    pub id: u32,
    pub debug: bool,
    pub listen: String,
    pub port: u16,
    /// Session receive timeout in milliseconds.
    pub timeout: u64,
    pub log_file: String,
    #[serde(default)]
    pub ac: Option<String>,
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_password: String,
    pub redis_db: i64,
}

impl MoConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config: Self = parse_config(path, &read_config_file(path)?)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_port("Port", self.port)?;
        check_port("RedisPort", self.redis_port)?;
        Ok(())
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    pub fn session_base_port(&self) -> u16 {
        self.port.saturating_add(1)
    }

    /// Connection URL for the stats cache.
    pub fn redis_url(&self) -> String {
        if self.redis_password.is_empty() {
            format!("redis://{}:{}/{}", self.redis_host, self.redis_port, self.redis_db)
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                self.redis_password, self.redis_host, self.redis_port, self.redis_db
            )
        }
    }
}
