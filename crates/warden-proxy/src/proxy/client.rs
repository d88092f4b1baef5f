//! HTTP client used to forward plain HTTP requests.

use super::response_ext::ProxyBody;
use crate::config::TimeoutConfig;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::info;

/// Type alias for the HTTP client used by the forwarder.
pub type HttpClient = Client<HttpConnector, ProxyBody>;

/// Create the forwarding client.
///
/// Idle upstream connections are not pooled: every forwarded request opens
/// its own outbound connection, which is closed once the exchange finishes.
/// Only `http://` targets are accepted; HTTPS travels over CONNECT.
pub fn create_http_client(timeouts: &TimeoutConfig) -> HttpClient {
    let mut http_connector = HttpConnector::new();
    http_connector.set_connect_timeout(Some(timeouts.connect()));
    http_connector.set_nodelay(true);
    http_connector.enforce_http(true);

    let http_client = Client::builder(TokioExecutor::new())
        .pool_max_idle_per_host(0)
        .build(http_connector);

    info!(
        "Forwarding client configured: connect_timeout={}s, pooling disabled",
        timeouts.connect_secs
    );

    http_client
}
