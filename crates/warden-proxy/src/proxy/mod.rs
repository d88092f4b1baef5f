//! Proxy server module.
//!
//! # Module Structure
//!
//! - `server` - ProxyServer, its builder and the accept loops
//! - `handler` - Request classification and access checks
//! - `forwarding` - Plain HTTP forwarding
//! - `tunnel` - CONNECT tunnels
//! - `client` - HTTP client used by the forwarder
//! - `context` - Client IP and CONNECT target extraction
//! - `tls` - TLS acceptor for the HTTPS listener
//! - `network` - Listener creation and the upstream dialer

mod client;
mod context;
mod error;
mod forwarding;
mod handler;
mod headers;
mod network;
mod response_ext;
mod server;
mod tls;
mod tunnel;

#[cfg(test)]
mod tests;

pub use context::{InboundRequest, TunnelTarget};
pub use error::{ProxyError, ProxyResult};
pub use forwarding::{access_denied_response, HttpForwarder, ACCESS_DENIED_BODY};
pub use handler::{ConnectionState, RequestHandler};
pub use network::{create_reusable_listener, Dialer, TcpDialer};
pub use response_ext::ProxyBody;
pub use server::{serve_metrics, ProxyServer, ProxyServerBuilder};
pub use tls::create_tls_acceptor;
pub use tunnel::{Leg, TunnelEnd, TunnelRelay, TunnelSession};
