//! Configuration errors. All of them are fatal at startup.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid ipWhitelist entry '{0}': not an IP address")]
    InvalidWhitelistEntry(String),

    #[error("invalid time '{0}': expected H:MM between 0:00 and 23:59")]
    InvalidTime(String),

    #[error("blacklist window {start}-{end} wraps past midnight; windows must stay within one day")]
    WrappingWindow { start: String, end: String },

    #[error("invalid blacklist pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("includeHttps is enabled but no 'tls' section (certPath, keyPath) is configured")]
    MissingTls,

    #[error("httpPort and httpsPort must differ when includeHttps is enabled (both {0})")]
    PortClash(u16),
}
