//! URL matchers for blacklist rules.

use crate::config::{ConfigError, PatternConfig};
use regex::Regex;

/// Compiled form of a [`PatternConfig`].
#[derive(Debug, Clone)]
pub enum UrlMatcher {
    Exact(String),
    Contains(String),
    Regex(Regex),
}

impl UrlMatcher {
    pub fn compile(pattern: &PatternConfig) -> Result<Self, ConfigError> {
        match pattern {
            PatternConfig::Exact { exact } => Ok(UrlMatcher::Exact(exact.clone())),
            PatternConfig::Contains { contains } => Ok(UrlMatcher::Contains(contains.clone())),
            PatternConfig::Regex(regex) | PatternConfig::ExplicitRegex { regex } => Regex::new(regex)
                .map(UrlMatcher::Regex)
                .map_err(|source| ConfigError::InvalidPattern {
                    pattern: regex.clone(),
                    source,
                }),
        }
    }

    pub fn matches(&self, url: &str) -> bool {
        match self {
            UrlMatcher::Exact(p) => url == p,
            UrlMatcher::Contains(p) => url.contains(p.as_str()),
            UrlMatcher::Regex(r) => r.is_match(url),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            UrlMatcher::Exact(p) | UrlMatcher::Contains(p) => p,
            UrlMatcher::Regex(r) => r.as_str(),
        }
    }
}
