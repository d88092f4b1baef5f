//! Proxy lifecycle events and the sinks that receive them.
//!
//! The server holds one [`EventSink`] and calls [`EventSink::emit`] inline
//! from connection tasks. Sinks must return promptly: none of the provided
//! implementations await or block on I/O.

use crate::metrics;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Named events published by the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ProxyEvent {
    /// A plain HTTP request arrived, before any access decision.
    Request {
        client_ip: String,
        method: String,
        url: String,
    },
    /// A client connection closed.
    Close { peer: SocketAddr },
    /// A transport failure on either leg.
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        message: String,
    },
    IpDenied { client_ip: String },
    SiteDenied {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
    },
    /// A CONNECT request arrived, before any access decision.
    HttpConnect { client_ip: String, target: String },
    /// Upstream leg of a tunnel connected.
    TunnelConnect { target: String },
    /// Bytes relayed upstream -> client.
    TunnelDataIn { target: String, bytes: usize },
    /// Bytes relayed client -> upstream.
    TunnelDataOut { target: String, bytes: usize },
    /// Upstream leg reached end-of-stream.
    TunnelEndIn { target: String },
    /// Client leg reached end-of-stream.
    TunnelEndOut { target: String },
}

impl ProxyEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProxyEvent::Request { .. } => "request",
            ProxyEvent::Close { .. } => "close",
            ProxyEvent::Error { .. } => "error",
            ProxyEvent::IpDenied { .. } => "ipDenied",
            ProxyEvent::SiteDenied { .. } => "siteDenied",
            ProxyEvent::HttpConnect { .. } => "httpConnect",
            ProxyEvent::TunnelConnect { .. } => "tunnelConnect",
            ProxyEvent::TunnelDataIn { .. } => "tunnelDataIn",
            ProxyEvent::TunnelDataOut { .. } => "tunnelDataOut",
            ProxyEvent::TunnelEndIn { .. } => "tunnelEndIn",
            ProxyEvent::TunnelEndOut { .. } => "tunnelEndOut",
        }
    }

    pub fn error(target: Option<&str>, err: impl std::fmt::Display) -> Self {
        ProxyEvent::Error {
            target: target.map(str::to_string),
            message: err.to_string(),
        }
    }
}

/// Observer for proxy events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ProxyEvent);
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn emit(&self, event: ProxyEvent) {
        (**self).emit(event)
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: ProxyEvent) {}
}

/// Writes events to `tracing`. Per-chunk tunnel traffic goes to `debug`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: ProxyEvent) {
        match &event {
            ProxyEvent::TunnelDataIn { target, bytes } | ProxyEvent::TunnelDataOut { target, bytes } => {
                debug!(event = event.name(), %target, bytes, "tunnel data");
            }
            ProxyEvent::Request {
                client_ip,
                method,
                url,
            } => {
                debug!(event = event.name(), %client_ip, %method, %url, "request");
            }
            ProxyEvent::Close { peer } => debug!(event = event.name(), %peer, "connection closed"),
            ProxyEvent::Error { target, message } => {
                warn!(event = event.name(), target = target.as_deref().unwrap_or("-"), %message, "proxy error");
            }
            ProxyEvent::IpDenied { client_ip } => {
                info!(event = event.name(), %client_ip, "ip address denied");
            }
            ProxyEvent::SiteDenied { url, pattern } => {
                info!(event = event.name(), %url, pattern = pattern.as_deref().unwrap_or("-"), "site denied");
            }
            ProxyEvent::HttpConnect { client_ip, target } => {
                info!(event = event.name(), %client_ip, %target, "CONNECT request");
            }
            ProxyEvent::TunnelConnect { target }
            | ProxyEvent::TunnelEndIn { target }
            | ProxyEvent::TunnelEndOut { target } => {
                debug!(event = event.name(), %target, "tunnel");
            }
        }
    }
}

/// Records events in the Prometheus registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsSink;

impl EventSink for MetricsSink {
    fn emit(&self, event: ProxyEvent) {
        metrics::record_event(event.name());
        match &event {
            ProxyEvent::IpDenied { .. } => metrics::record_denial("ip"),
            ProxyEvent::SiteDenied { .. } => metrics::record_denial("site"),
            ProxyEvent::TunnelConnect { .. } => metrics::record_tunnel(),
            ProxyEvent::TunnelDataIn { bytes, .. } => metrics::record_tunnel_bytes("in", *bytes),
            ProxyEvent::TunnelDataOut { bytes, .. } => metrics::record_tunnel_bytes("out", *bytes),
            _ => {}
        }
    }
}

/// Forwards events to a bounded channel.
///
/// Uses `try_send`, so a consumer that falls behind loses events instead of
/// stalling the relay. Dropped events are counted.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ProxyEvent>,
    dropped: Arc<AtomicU64>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ProxyEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ProxyEvent) {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Delivers every event to each inner sink in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl EventSink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: ProxyEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}
