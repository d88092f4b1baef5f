//! Request dispatch.
//!
//! Every request is classified, checked against the [`AccessController`]
//! and then handed to the [`HttpForwarder`] or the [`TunnelRelay`]. Both
//! paths share [`RequestHandler::decide`], so a given client IP, URL and
//! minute always get the same verdict whichever way they arrive.

use super::context::{InboundRequest, TunnelTarget};
use super::forwarding::{access_denied_response, HttpForwarder};
use super::response_ext::ProxyBody;
use super::tunnel::{denied_response, TunnelRelay};
use crate::access::{AccessController, AccessDecision, Clock, DenyReason};
use crate::events::{EventSink, ProxyEvent};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Per-connection state shared between the serve loop and the handler.
#[derive(Debug)]
pub struct ConnectionState {
    pub peer: SocketAddr,
    tunneled: AtomicBool,
}

impl ConnectionState {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            tunneled: AtomicBool::new(false),
        }
    }

    /// The connection was handed over to a tunnel, which reports its close.
    pub fn mark_tunneled(&self) {
        self.tunneled.store(true, Ordering::Release);
    }

    pub fn is_tunneled(&self) -> bool {
        self.tunneled.load(Ordering::Acquire)
    }
}

pub struct RequestHandler {
    access: Arc<AccessController>,
    clock: Arc<dyn Clock>,
    forwarder: HttpForwarder,
    tunnel: TunnelRelay,
    sink: Arc<dyn EventSink>,
}

impl RequestHandler {
    pub fn new(
        access: Arc<AccessController>,
        clock: Arc<dyn Clock>,
        forwarder: HttpForwarder,
        tunnel: TunnelRelay,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            access,
            clock,
            forwarder,
            tunnel,
            sink,
        }
    }

    pub async fn handle(
        &self,
        req: Request<Incoming>,
        conn: &ConnectionState,
    ) -> Result<Response<ProxyBody>, Infallible> {
        if req.method() == Method::CONNECT {
            Ok(self.handle_connect(req, conn).await)
        } else {
            Ok(self.handle_http(req, conn.peer).await)
        }
    }

    async fn handle_http(&self, req: Request<Incoming>, peer: SocketAddr) -> Response<ProxyBody> {
        let inbound = InboundRequest::from_request(&req, peer);
        let url = inbound.url();
        self.sink.emit(ProxyEvent::Request {
            client_ip: inbound.client_ip.clone(),
            method: inbound.method.to_string(),
            url: url.clone(),
        });

        // Origin-form targets ("/path") name no destination.
        if inbound.uri.host().is_none() {
            debug!("Rejecting request without a host from {}: {}", peer, url);
            return access_denied_response();
        }

        let decision = self.decide(&inbound.client_ip, &url);
        if !decision.allowed {
            self.report_denial(&decision, &inbound.client_ip, &url);
            return access_denied_response();
        }

        self.forwarder.forward(&inbound, req).await
    }

    async fn handle_connect(
        &self,
        req: Request<Incoming>,
        conn: &ConnectionState,
    ) -> Response<ProxyBody> {
        let inbound = InboundRequest::from_connect(&req, conn.peer);
        self.sink.emit(ProxyEvent::HttpConnect {
            client_ip: inbound.client_ip.clone(),
            target: inbound.url(),
        });

        let target = match TunnelTarget::from_uri(&inbound.uri) {
            Ok(target) => target,
            Err(e) => {
                debug!("Rejecting CONNECT from {}: {}", conn.peer, e);
                return denied_response();
            }
        };

        let url = target.url();
        let decision = self.decide(&inbound.client_ip, &url);
        if !decision.allowed {
            self.report_denial(&decision, &inbound.client_ip, &url);
            return denied_response();
        }

        let response = self.tunnel.open(&target, conn.peer, req).await;
        if response.status() == StatusCode::OK {
            conn.mark_tunneled();
        }
        response
    }

    /// Verdict for `client_ip` reaching `url` at the current local minute.
    pub fn decide(&self, client_ip: &str, url: &str) -> AccessDecision {
        self.access
            .evaluate(client_ip, url, self.clock.minute_of_day())
    }

    fn report_denial(&self, decision: &AccessDecision, client_ip: &str, url: &str) {
        match decision.reason {
            DenyReason::IpDenied => {
                info!("Denied client {} (not whitelisted)", client_ip);
                self.sink.emit(ProxyEvent::IpDenied {
                    client_ip: client_ip.to_string(),
                });
            }
            DenyReason::SiteDenied => {
                let pattern = decision
                    .matched_rule
                    .as_ref()
                    .map(|rule| rule.matcher.as_str().to_string());
                info!(
                    "Denied {} for {} (rule {})",
                    url,
                    client_ip,
                    pattern.as_deref().unwrap_or("-")
                );
                self.sink.emit(ProxyEvent::SiteDenied {
                    url: url.to_string(),
                    pattern,
                });
            }
            DenyReason::None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_starts_untunneled() {
        let conn = ConnectionState::new("127.0.0.1:1234".parse().unwrap());
        assert!(!conn.is_tunneled());
        conn.mark_tunneled();
        assert!(conn.is_tunneled());
    }
}
