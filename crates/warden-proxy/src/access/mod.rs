//! Access control decisions.
//!
//! A request is evaluated in two steps:
//!
//! 1. Client IP whitelist. When the whitelist is non-empty and the client
//!    is not on it, the request is denied and the blacklist is not consulted.
//! 2. Site blacklist. Rules are checked in declared order; a rule denies when
//!    its pattern matches the full URL and the current minute-of-day lies in
//!    its inclusive window. The first matching rule is reported.
//!
//! Evaluation is pure: the caller supplies the time, so the same inputs always
//! produce the same decision.

mod matcher;
mod window;

pub use matcher::UrlMatcher;
pub use window::{Clock, FixedClock, LocalClock, MinuteOfDay, TimeWindow};

use crate::config::{Config, ConfigError};
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

/// A compiled blacklist rule.
#[derive(Debug, Clone)]
pub struct BlacklistRule {
    /// Position in the configured blacklist
    pub index: usize,
    pub matcher: UrlMatcher,
    pub window: TimeWindow,
}

impl BlacklistRule {
    pub fn new(index: usize, matcher: UrlMatcher, window: TimeWindow) -> Self {
        Self {
            index,
            matcher,
            window,
        }
    }

    pub fn applies(&self, url: &str, now: MinuteOfDay) -> bool {
        self.window.contains(now) && self.matcher.matches(url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    None,
    IpDenied,
    SiteDenied,
}

#[derive(Debug, Clone)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: DenyReason,
    pub matched_rule: Option<Arc<BlacklistRule>>,
}

impl AccessDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: DenyReason::None,
            matched_rule: None,
        }
    }

    fn ip_denied() -> Self {
        Self {
            allowed: false,
            reason: DenyReason::IpDenied,
            matched_rule: None,
        }
    }

    fn site_denied(rule: Arc<BlacklistRule>) -> Self {
        Self {
            allowed: false,
            reason: DenyReason::SiteDenied,
            matched_rule: Some(rule),
        }
    }
}

/// Whitelist and blacklist compiled from a [`Config`].
#[derive(Debug, Clone, Default)]
pub struct AccessController {
    whitelist: HashSet<String>,
    blacklist: Vec<Arc<BlacklistRule>>,
}

impl AccessController {
    pub fn new(whitelist: impl IntoIterator<Item = String>, blacklist: Vec<BlacklistRule>) -> Self {
        Self {
            whitelist: whitelist.into_iter().map(|ip| canonical_ip(&ip)).collect(),
            blacklist: blacklist.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut whitelist = HashSet::with_capacity(config.ip_whitelist.len());
        for entry in &config.ip_whitelist {
            let ip: IpAddr = entry
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidWhitelistEntry(entry.clone()))?;
            whitelist.insert(ip.to_string());
        }

        let blacklist = config
            .site_blacklist
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                Ok(Arc::new(BlacklistRule::new(
                    index,
                    UrlMatcher::compile(&entry.pattern)?,
                    TimeWindow::parse(&entry.between)?,
                )))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            whitelist,
            blacklist,
        })
    }

    pub fn evaluate(&self, client_ip: &str, target_url: &str, now: MinuteOfDay) -> AccessDecision {
        if !self.whitelist.is_empty() && !self.whitelist.contains(&canonical_ip(client_ip)) {
            return AccessDecision::ip_denied();
        }

        self.blacklist
            .iter()
            .find(|rule| rule.applies(target_url, now))
            .map(|rule| AccessDecision::site_denied(Arc::clone(rule)))
            .unwrap_or_else(AccessDecision::allow)
    }

    pub fn whitelist_len(&self) -> usize {
        self.whitelist.len()
    }

    pub fn rules(&self) -> &[Arc<BlacklistRule>] {
        &self.blacklist
    }
}

/// Normalize textual IPs so `::1` and `0:0:0:0:0:0:0:1` compare equal.
/// Anything that does not parse is compared verbatim.
fn canonical_ip(ip: &str) -> String {
    let trimmed = ip.trim();
    match trimmed.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        Ok(ip) => ip.to_string(),
        Err(_) => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BlacklistEntry, PatternConfig};

    fn at(hour: u16, minute: u16) -> MinuteOfDay {
        MinuteOfDay::from_hm(hour, minute).unwrap()
    }

    fn entry(pattern: PatternConfig, start: &str, end: &str) -> BlacklistEntry {
        BlacklistEntry {
            pattern,
            between: [start.to_string(), end.to_string()],
        }
    }

    fn controller(whitelist: &[&str], blacklist: Vec<BlacklistEntry>) -> AccessController {
        let config = Config {
            ip_whitelist: whitelist.iter().map(|s| s.to_string()).collect(),
            site_blacklist: blacklist,
            ..Default::default()
        };
        AccessController::from_config(&config).unwrap()
    }

    fn office_hours() -> Vec<BlacklistEntry> {
        vec![entry(
            PatternConfig::Regex("example.com".to_string()),
            "09:00",
            "17:00",
        )]
    }

    #[test]
    fn test_empty_config_allows_everything() {
        let ac = controller(&[], vec![]);
        let decision = ac.evaluate("10.1.2.3", "http://anything/", at(3, 0));
        assert!(decision.allowed);
        assert_eq!(decision.reason, DenyReason::None);
        assert!(decision.matched_rule.is_none());
    }

    #[test]
    fn test_ip_not_whitelisted_short_circuits() {
        let ac = controller(&["127.0.0.1"], office_hours());
        let decision = ac.evaluate("10.0.0.5", "http://example.com/", at(12, 0));
        assert!(!decision.allowed);
        assert_eq!(decision.reason, DenyReason::IpDenied);
        assert!(decision.matched_rule.is_none());
    }

    #[test]
    fn test_ip_denied_regardless_of_time_and_url() {
        let ac = controller(&["127.0.0.1"], office_hours());
        for minute in [0, 540, 1020, 1439] {
            let now = MinuteOfDay::new(minute).unwrap();
            for url in ["http://example.com/", "http://other.org/", ""] {
                assert_eq!(ac.evaluate("10.0.0.5", url, now).reason, DenyReason::IpDenied);
            }
        }
    }

    #[test]
    fn test_site_denied_inside_window() {
        let ac = controller(&["127.0.0.1"], office_hours());
        let decision = ac.evaluate("127.0.0.1", "http://example.com/", at(12, 0));
        assert!(!decision.allowed);
        assert_eq!(decision.reason, DenyReason::SiteDenied);
        assert_eq!(decision.matched_rule.unwrap().index, 0);
    }

    #[test]
    fn test_allowed_outside_window() {
        let ac = controller(&["127.0.0.1"], office_hours());
        let decision = ac.evaluate("127.0.0.1", "http://example.com/", at(18, 0));
        assert!(decision.allowed);
    }

    #[test]
    fn test_window_boundaries_inclusive() {
        let ac = controller(&[], office_hours());
        let url = "http://example.com/";
        assert!(ac.evaluate("1.1.1.1", url, at(8, 59)).allowed);
        assert!(!ac.evaluate("1.1.1.1", url, at(9, 0)).allowed);
        assert!(!ac.evaluate("1.1.1.1", url, at(17, 0)).allowed);
        assert!(ac.evaluate("1.1.1.1", url, at(17, 1)).allowed);
    }

    #[test]
    fn test_first_declared_rule_wins() {
        let ac = controller(
            &[],
            vec![
                entry(
                    PatternConfig::Contains {
                        contains: "github".to_string(),
                    },
                    "0:00",
                    "23:59",
                ),
                entry(PatternConfig::Regex("github\\.com".to_string()), "0:00", "23:59"),
            ],
        );
        let decision = ac.evaluate("1.1.1.1", "https://github.com:443", at(10, 0));
        assert_eq!(decision.matched_rule.unwrap().index, 0);
    }

    #[test]
    fn test_later_rule_matches_when_earlier_window_closed() {
        let ac = controller(
            &[],
            vec![
                entry(PatternConfig::Regex("github".to_string()), "0:00", "8:00"),
                entry(PatternConfig::Regex("github".to_string()), "9:00", "23:59"),
            ],
        );
        let decision = ac.evaluate("1.1.1.1", "http://github.com/", at(10, 0));
        assert_eq!(decision.matched_rule.unwrap().index, 1);
    }

    #[test]
    fn test_whitelist_ipv6_normalization() {
        let ac = controller(&["::1"], vec![]);
        assert!(ac.evaluate("0:0:0:0:0:0:0:1", "http://a/", at(1, 0)).allowed);
        assert!(!ac.evaluate("::2", "http://a/", at(1, 0)).allowed);
    }

    #[test]
    fn test_ipv4_mapped_peer_matches_ipv4_entry() {
        let ac = controller(&["127.0.0.1"], vec![]);
        assert!(ac.evaluate("::ffff:127.0.0.1", "http://a/", at(1, 0)).allowed);
    }

    #[test]
    fn test_unparseable_client_ip_is_not_whitelisted() {
        let ac = controller(&["127.0.0.1"], vec![]);
        let decision = ac.evaluate("127.0.0.1, 10.0.0.1", "http://a/", at(1, 0));
        assert_eq!(decision.reason, DenyReason::IpDenied);
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let ac = controller(&["127.0.0.1"], office_hours());
        let first = ac.evaluate("127.0.0.1", "http://example.com/x", at(9, 30));
        for _ in 0..10 {
            let again = ac.evaluate("127.0.0.1", "http://example.com/x", at(9, 30));
            assert_eq!(again.allowed, first.allowed);
            assert_eq!(again.reason, first.reason);
        }
    }

    #[test]
    fn test_new_with_compiled_rules() {
        let rule = BlacklistRule::new(
            0,
            UrlMatcher::Exact("http://a/".to_string()),
            TimeWindow::new(at(0, 0), at(23, 59)).unwrap(),
        );
        let ac = AccessController::new(Vec::new(), vec![rule]);
        assert_eq!(ac.rules().len(), 1);
        assert_eq!(ac.whitelist_len(), 0);
        assert!(!ac.evaluate("1.2.3.4", "http://a/", at(5, 0)).allowed);
        assert!(ac.evaluate("1.2.3.4", "http://a/b", at(5, 0)).allowed);
    }
}
