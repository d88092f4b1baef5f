//! Site blacklist configuration.

use serde::Deserialize;

/// One blacklist entry as written in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct BlacklistEntry {
    /// Matched against the full request URL
    #[serde(alias = "regex")]
    pub pattern: PatternConfig,
    /// Inclusive `["H:MM", "H:MM"]` window, same day only
    pub between: [String; 2],
}

/// URL pattern. A bare string is a regular expression.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PatternConfig {
    Regex(String),
    Exact { exact: String },
    Contains { contains: String },
    ExplicitRegex { regex: String },
}

