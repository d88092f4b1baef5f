//! Plain HTTP forwarding.
//!
//! Request and response bodies are streamed: hyper only polls the client
//! body once the upstream connection is writable, and only polls the
//! upstream body as the client connection accepts bytes. Nothing is
//! buffered beyond a single frame.

use super::client::HttpClient;
use super::context::InboundRequest;
use super::error::ProxyError;
use super::headers::{
    ProxyHeadersExt, CACHE_CONTROL, CONNECTION, CONTENT_TYPE, VALUE_CLOSE, VALUE_NO_CACHE,
    VALUE_TEXT_PLAIN,
};
use super::response_ext::{ProxyBody, ResponseExt};
use crate::events::{EventSink, ProxyEvent};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use tracing::{debug, warn};

pub const ACCESS_DENIED_BODY: &str = "Access denied";

/// 403 returned to denied plain HTTP requests. The connection is closed
/// after it is written.
pub fn access_denied_response() -> Response<ProxyBody> {
    let mut response = Response::new(Full::new(Bytes::from_static(ACCESS_DENIED_BODY.as_bytes())));
    *response.status_mut() = StatusCode::FORBIDDEN;
    response.set_header(&CONTENT_TYPE, &VALUE_TEXT_PLAIN);
    response.set_header(&CACHE_CONTROL, &VALUE_NO_CACHE);
    response.set_header(&CONNECTION, &VALUE_CLOSE);
    response.into_boxed()
}

/// 502 returned when the upstream could not be reached at all.
pub fn bad_gateway_response() -> Response<ProxyBody> {
    let mut response = Response::new(Full::new(Bytes::from_static(b"Bad Gateway")));
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    response.set_header(&CONTENT_TYPE, &VALUE_TEXT_PLAIN);
    response.set_header(&CONNECTION, &VALUE_CLOSE);
    response.into_boxed()
}

/// Forwards allowed plain HTTP requests to their destination.
pub struct HttpForwarder {
    client: HttpClient,
    sink: Arc<dyn EventSink>,
}

impl HttpForwarder {
    pub fn new(client: HttpClient, sink: Arc<dyn EventSink>) -> Self {
        Self { client, sink }
    }

    /// Replay method, headers and body upstream and stream the response back.
    ///
    /// Stream errors on either body are reported as `error` events; hyper then
    /// aborts the affected connection.
    pub async fn forward(
        &self,
        inbound: &InboundRequest,
        req: Request<Incoming>,
    ) -> Response<ProxyBody> {
        let url = inbound.url();
        debug!("Forwarding {} {}", inbound.method, url);

        let (parts, body) = req.into_parts();
        let body = report_errors(body, Arc::clone(&self.sink), url.clone());
        let upstream_req = Request::from_parts(parts, body);

        match self.client.request(upstream_req).await {
            Ok(upstream_response) => {
                debug!("Upstream answered {} for {}", upstream_response.status(), url);
                upstream_response.map(|body| report_errors(body, Arc::clone(&self.sink), url))
            }
            Err(e) => {
                let err = ProxyError::from(e);
                warn!("Failed to forward request to {}: {}", url, err);
                self.sink.emit(ProxyEvent::error(Some(url.as_str()), &err));
                bad_gateway_response()
            }
        }
    }
}

fn report_errors(body: Incoming, sink: Arc<dyn EventSink>, url: String) -> ProxyBody {
    body.map_err(move |e| {
        sink.emit(ProxyEvent::error(Some(url.as_str()), &e));
        e
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_access_denied_response() {
        let response = access_denied_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers().get("content-type").unwrap(), "text/plain");
        assert_eq!(
            response.headers().get("cache-control").unwrap(),
            "no-cache, no-store"
        );
        assert_eq!(response.headers().get("connection").unwrap(), "close");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"Access denied");
    }

    #[test]
    fn test_bad_gateway_response() {
        let response = bad_gateway_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
