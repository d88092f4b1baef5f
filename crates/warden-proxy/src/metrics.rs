//! Prometheus metrics for warden-proxy.
//!
//! Tracks proxy events, access denials and tunnel traffic.
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_int_counter, register_int_counter_vec, CounterVec, Encoder,
    IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    /// Proxy events by name
    pub static ref EVENTS_TOTAL: CounterVec = register_counter_vec!(
        "warden_events_total",
        "Total number of proxy events published",
        &["event"]
    )
    .unwrap();

    /// Access denials
    pub static ref DENIALS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "warden_denials_total",
        "Total number of denied requests",
        &["reason"]  // reason: ip|site
    )
    .unwrap();

    /// Tunnels that reached the established state
    pub static ref TUNNELS_TOTAL: IntCounter = register_int_counter!(
        "warden_tunnels_total",
        "Total number of CONNECT tunnels established"
    )
    .unwrap();

    /// Bytes relayed through tunnels
    pub static ref TUNNEL_BYTES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "warden_tunnel_bytes_total",
        "Total bytes relayed through CONNECT tunnels",
        &["direction"]  // direction: in (upstream->client) | out (client->upstream)
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_event(name: &str) {
    EVENTS_TOTAL.with_label_values(&[name]).inc();
}

pub fn record_denial(reason: &str) {
    DENIALS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_tunnel() {
    TUNNELS_TOTAL.inc();
}

pub fn record_tunnel_bytes(direction: &str, bytes: usize) {
    TUNNEL_BYTES_TOTAL
        .with_label_values(&[direction])
        .inc_by(bytes as u64);
}
