//! Listener, TLS, timeout and metrics configuration.

use serde::Deserialize;
use std::time::Duration;

/// TLS material for the HTTPS listener
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// Path to TLS certificate file (PEM format)
    pub cert_path: String,
    /// Path to TLS private key file (PEM format)
    pub key_path: String,
}

/// Upstream-leg hardening timeouts.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutConfig {
    /// Maximum time to establish an upstream TCP connection
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
    /// A tunnel with no traffic in either direction for this long is closed
    #[serde(default = "default_idle_secs")]
    pub idle_secs: u64,
}

fn default_connect_secs() -> u64 {
    10
}

fn default_idle_secs() -> u64 {
    300
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            idle_secs: default_idle_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}
