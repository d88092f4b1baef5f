//! Warden: a forward HTTP/HTTPS proxy with an IP whitelist and a
//! time-windowed site blacklist.
//!
//! - [`access`] decides whether a client may reach a URL at a given minute.
//! - [`proxy`] serves plain HTTP forwarding and CONNECT tunnels.
//! - [`events`] carries the named lifecycle events the proxy publishes.

pub mod access;
pub mod config;
pub mod events;
pub mod metrics;
pub mod proxy;

pub use access::{AccessController, AccessDecision, DenyReason};
pub use config::{Config, ConfigError};
pub use events::{EventSink, ProxyEvent};
pub use proxy::{ProxyServer, ProxyServerBuilder};
