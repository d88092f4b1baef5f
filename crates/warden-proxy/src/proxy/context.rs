//! Per-request metadata and target parsing.

use super::error::ProxyError;
use super::headers::X_FORWARDED_FOR;
use hyper::{HeaderMap, Method, Request, Uri, Version};
use std::net::SocketAddr;

/// Default port for CONNECT targets without one.
pub const DEFAULT_TUNNEL_PORT: u16 = 443;

/// Metadata extracted from an inbound request before routing.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub peer: SocketAddr,
    pub client_ip: String,
}

impl InboundRequest {
    /// Plain HTTP requests honor `x-forwarded-for`.
    pub fn from_request<B>(req: &Request<B>, peer: SocketAddr) -> Self {
        Self::build(req, peer, forwarded_or_peer_ip(req.headers(), peer))
    }

    /// CONNECT requests always use the transport peer address.
    pub fn from_connect<B>(req: &Request<B>, peer: SocketAddr) -> Self {
        Self::build(req, peer, peer.ip().to_string())
    }

    fn build<B>(req: &Request<B>, peer: SocketAddr, client_ip: String) -> Self {
        Self {
            method: req.method().clone(),
            uri: req.uri().clone(),
            version: req.version(),
            headers: req.headers().clone(),
            peer,
            client_ip,
        }
    }

    /// Full URL used for blacklist matching.
    pub fn url(&self) -> String {
        self.uri.to_string()
    }
}

/// `x-forwarded-for` verbatim when present, else the peer IP.
pub fn forwarded_or_peer_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get(&X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string())
}

/// Host and port of a CONNECT request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelTarget {
    pub host: String,
    pub port: u16,
}

impl TunnelTarget {
    /// Parse the authority of a CONNECT request.
    ///
    /// - `api.example.com:8443` -> ("api.example.com", 8443)
    /// - `api.example.com` -> ("api.example.com", 443)
    /// - `[::1]:443` -> ("::1", 443)
    pub fn from_uri(uri: &Uri) -> Result<Self, ProxyError> {
        let authority = uri
            .authority()
            .ok_or_else(|| ProxyError::InvalidTarget(format!("missing authority in '{uri}'")))?;
        let host = authority.host().trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(ProxyError::InvalidTarget(format!("missing host in '{uri}'")));
        }

        Ok(Self {
            host: host.to_string(),
            port: authority.port_u16().unwrap_or(DEFAULT_TUNNEL_PORT),
        })
    }

    /// Address handed to the dialer.
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// URL evaluated against the blacklist; the scheme is assumed `https`.
    pub fn url(&self) -> String {
        format!("https://{}", self.addr())
    }
}
