//! Tests for the proxy module.
//!
//! Exercises the pieces that sit between parsing and I/O: how plain and
//! CONNECT requests are turned into the URL the access rules see.

#[cfg(test)]
mod decision_tests {
    use crate::access::{Clock, FixedClock, MinuteOfDay};
    use crate::config::Config;
    use crate::events::NoopSink;
    use crate::proxy::client::create_http_client;
    use crate::proxy::context::{InboundRequest, TunnelTarget};
    use crate::proxy::forwarding::HttpForwarder;
    use crate::proxy::handler::RequestHandler;
    use crate::proxy::network::TcpDialer;
    use crate::proxy::tunnel::TunnelRelay;
    use crate::access::{AccessController, DenyReason};
    use hyper::{Request, Uri};
    use std::sync::Arc;
    use std::time::Duration;

    const CONFIG: &str = r#"
ipWhitelist: ["127.0.0.1", "192.168.1.20"]
siteBlacklist:
  - pattern: "example\\.com"
    between: ["9:00", "17:00"]
"#;

    fn handler_at(hour: u16, minute: u16) -> RequestHandler {
        let config = Config::from_yaml(CONFIG).unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(MinuteOfDay::from_hm(hour, minute).unwrap()));
        let sink = Arc::new(NoopSink);
        RequestHandler::new(
            Arc::new(AccessController::from_config(&config).unwrap()),
            clock,
            HttpForwarder::new(create_http_client(&config.timeouts), sink.clone()),
            TunnelRelay::new(
                Arc::new(TcpDialer::new(Duration::from_secs(1))),
                sink.clone(),
                Duration::from_secs(5),
            ),
            sink,
        )
    }

    fn connect_url(authority: &str) -> String {
        let uri: Uri = authority.parse().unwrap();
        TunnelTarget::from_uri(&uri).unwrap().url()
    }

    #[test]
    fn test_plain_and_connect_paths_agree() {
        let handler = handler_at(12, 0);
        let plain = handler.decide("127.0.0.1", "http://example.com/index.html");
        let tunnel = handler.decide("127.0.0.1", &connect_url("example.com:443"));
        assert!(!plain.allowed);
        assert!(!tunnel.allowed);
        assert_eq!(plain.reason, tunnel.reason);
        assert_eq!(plain.reason, DenyReason::SiteDenied);
    }

    #[test]
    fn test_window_closes_for_both_paths() {
        let handler = handler_at(18, 0);
        assert!(handler.decide("127.0.0.1", "http://example.com/").allowed);
        assert!(handler.decide("127.0.0.1", &connect_url("example.com:443")).allowed);
    }

    #[test]
    fn test_unlisted_ip_denied_for_both_paths() {
        let handler = handler_at(18, 0);
        let plain = handler.decide("10.0.0.5", "http://other.org/");
        let tunnel = handler.decide("10.0.0.5", &connect_url("other.org:443"));
        assert_eq!(plain.reason, DenyReason::IpDenied);
        assert_eq!(tunnel.reason, DenyReason::IpDenied);
    }

    #[test]
    fn test_forwarded_ip_is_what_gets_checked() {
        let handler = handler_at(18, 0);
        let req = Request::builder()
            .uri("http://other.org/")
            .header("x-forwarded-for", "10.0.0.5")
            .body(())
            .unwrap();
        let inbound = InboundRequest::from_request(&req, "127.0.0.1:40000".parse().unwrap());
        let decision = handler.decide(&inbound.client_ip, &inbound.url());
        assert_eq!(decision.reason, DenyReason::IpDenied);
    }

    #[test]
    fn test_connect_ignores_forwarded_header() {
        let handler = handler_at(18, 0);
        let req = Request::builder()
            .method("CONNECT")
            .uri("other.org:443")
            .header("x-forwarded-for", "10.0.0.5")
            .body(())
            .unwrap();
        let inbound = InboundRequest::from_connect(&req, "127.0.0.1:40000".parse().unwrap());
        assert_eq!(inbound.client_ip, "127.0.0.1");
        assert!(handler.decide(&inbound.client_ip, &connect_url("other.org:443")).allowed);
    }
}

#[cfg(test)]
mod target_tests {
    use crate::proxy::context::TunnelTarget;
    use hyper::Uri;

    #[test]
    fn test_connect_url_includes_default_port() {
        let uri: Uri = "example.com".parse().unwrap();
        let target = TunnelTarget::from_uri(&uri).unwrap();
        assert_eq!(target.url(), "https://example.com:443");
    }

    #[test]
    fn test_connect_url_ipv6() {
        let uri: Uri = "[::1]:8443".parse().unwrap();
        let target = TunnelTarget::from_uri(&uri).unwrap();
        assert_eq!(target.addr(), "[::1]:8443");
        assert_eq!(target.url(), "https://[::1]:8443");
    }
}
