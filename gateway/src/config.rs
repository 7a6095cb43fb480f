use proxy::config::{Config as ProxyConfig, ValidationError};
use serde::Deserialize;
use shared::vars::expand_env_vars;
use std::fs;

#[derive(Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive. `RUST_LOG` takes precedence.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    pub sentry_dsn: Option<String>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".into()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Self::default_level(),
            sentry_dsn: None,
        }
    }
}

#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub proxy: ProxyConfig,
}

impl Config {
    /// Reads a YAML config, expanding `${NAME}` from the environment first.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let data = serde_yaml::from_str(&expand_env_vars(&raw))?;

        Ok(data)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.proxy.validate()?;
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
}
