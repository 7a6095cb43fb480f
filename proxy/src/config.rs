use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Listener and admin listener cannot share {0}:{1}")]
    ListenerConflict(String, u16),

    #[error("Watch retry budget cannot be 0")]
    InvalidRetryBudget,
}

/// Gateway configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for proxied traffic and the status pages
    #[serde(default)]
    pub listener: Listener,
    /// Admin listener for health and readiness checks
    #[serde(default = "Listener::admin_default")]
    pub admin_listener: Listener,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listener: Listener::default(),
            admin_listener: Listener::admin_default(),
            watch: WatchConfig::default(),
            upstream: UpstreamConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.listener == self.admin_listener {
            return Err(ValidationError::ListenerConflict(
                self.listener.host.clone(),
                self.listener.port,
            ));
        }

        if self.watch.max_retries == 0 {
            return Err(ValidationError::InvalidRetryBudget);
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

impl Listener {
    fn admin_default() -> Self {
        Listener {
            host: "0.0.0.0".into(),
            port: 8081,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Orchestrator watch settings
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct WatchConfig {
    /// Restrict discovery to one namespace. All namespaces when unset.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Attempts to re-establish the watches before giving up
    #[serde(default = "WatchConfig::default_max_retries")]
    pub max_retries: u32,
    /// Delay between re-establishment attempts
    #[serde(default = "WatchConfig::default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl WatchConfig {
    fn default_max_retries() -> u32 {
        3
    }

    fn default_retry_delay_secs() -> u64 {
        5
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            namespace: None,
            max_retries: Self::default_max_retries(),
            retry_delay_secs: Self::default_retry_delay_secs(),
        }
    }
}

/// Backend client settings
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct UpstreamConfig {
    /// TCP connect timeout for backend connections
    #[serde(default = "UpstreamConfig::default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl UpstreamConfig {
    fn default_connect_timeout_secs() -> u64 {
        10
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        UpstreamConfig {
            connect_timeout_secs: Self::default_connect_timeout_secs(),
        }
    }
}
