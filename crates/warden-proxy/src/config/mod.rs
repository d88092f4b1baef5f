//! Configuration types for the Warden proxy.

mod error;
mod listen;
mod rules;

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use serde::Deserialize;

pub use error::ConfigError;
pub use listen::{MetricsConfig, TimeoutConfig, TlsConfig};
pub use rules::{BlacklistEntry, PatternConfig};

use crate::access::AccessController;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_https_port")]
    pub https_port: u16,
    #[serde(default)]
    pub include_https: bool,

    /// Address both listeners bind to
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Client IPs allowed to use the proxy. Empty allows everyone.
    #[serde(default)]
    pub ip_whitelist: Vec<String>,

    /// Evaluated in declared order; the first match wins.
    #[serde(default)]
    pub site_blacklist: Vec<BlacklistEntry>,

    /// Certificate and key for the HTTPS listener
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Prometheus endpoint; disabled when absent
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
}

fn default_http_port() -> u16 {
    8081
}

fn default_https_port() -> u16 {
    8082
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            https_port: default_https_port(),
            include_https: false,
            bind_address: default_bind_address(),
            ip_whitelist: Vec::new(),
            site_blacklist: Vec::new(),
            tls: None,
            timeouts: TimeoutConfig::default(),
            metrics: None,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    ///
    /// Compiles the access rules once so that malformed whitelist entries,
    /// times and patterns are rejected here rather than per request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.include_https {
            if self.tls.is_none() {
                return Err(ConfigError::MissingTls);
            }
            if self.http_port == self.https_port {
                return Err(ConfigError::PortClash(self.http_port));
            }
        }

        AccessController::from_config(self)?;
        Ok(())
    }
}
