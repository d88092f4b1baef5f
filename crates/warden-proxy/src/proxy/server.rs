//! ProxyServer struct and accept loops.
//!
//! The server owns the request handler and the event sink. Each accepted
//! connection runs in its own task; CONNECT requests upgrade the connection
//! and continue in the tunnel task spawned by the relay.

use super::client::create_http_client;
use super::forwarding::HttpForwarder;
use super::handler::{ConnectionState, RequestHandler};
use super::network::{create_reusable_listener, Dialer, TcpDialer};
use super::response_ext::{ProxyBody, ResponseExt};
use super::tls::create_tls_acceptor;
use super::tunnel::TunnelRelay;
use crate::access::{AccessController, Clock, LocalClock};
use crate::config::{Config, ConfigError};
use crate::events::{EventSink, NoopSink, ProxyEvent};
use crate::metrics::collect_metrics;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept. Errors such as EMFILE persist until a
/// connection closes, so retrying at once would spin.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// The forward proxy.
pub struct ProxyServer {
    config: Arc<Config>,
    handler: Arc<RequestHandler>,
    sink: Arc<dyn EventSink>,
}

/// Builder for [`ProxyServer`]. Everything but the config has a default.
pub struct ProxyServerBuilder {
    config: Config,
    sink: Option<Arc<dyn EventSink>>,
    clock: Option<Arc<dyn Clock>>,
    dialer: Option<Arc<dyn Dialer>>,
}

impl ProxyServerBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            sink: None,
            clock: None,
            dialer: None,
        }
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Clock used for blacklist windows. Defaults to local wall-clock time.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Dialer for the upstream leg of tunnels.
    pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Validate the config and compile the access rules.
    pub fn build(self) -> Result<ProxyServer, ConfigError> {
        self.config.validate()?;
        let access = Arc::new(AccessController::from_config(&self.config)?);
        let sink = self.sink.unwrap_or_else(|| Arc::new(NoopSink));
        let clock = self.clock.unwrap_or_else(|| Arc::new(LocalClock));
        let timeouts = &self.config.timeouts;
        let dialer = self
            .dialer
            .unwrap_or_else(|| Arc::new(TcpDialer::new(timeouts.connect())));

        let forwarder = HttpForwarder::new(create_http_client(timeouts), Arc::clone(&sink));
        let tunnel = TunnelRelay::new(dialer, Arc::clone(&sink), timeouts.idle());

        info!(
            "Access rules loaded: {} whitelisted IPs, {} blacklist rules",
            access.whitelist_len(),
            access.rules().len()
        );

        Ok(ProxyServer {
            handler: Arc::new(RequestHandler::new(
                access,
                clock,
                forwarder,
                tunnel,
                Arc::clone(&sink),
            )),
            config: Arc::new(self.config),
            sink,
        })
    }
}

impl ProxyServer {
    /// Create a proxy with the default clock and dialer.
    pub fn new(config: Config, sink: Arc<dyn EventSink>) -> Result<Self, ConfigError> {
        ProxyServerBuilder::new(config).sink(sink).build()
    }

    pub fn builder(config: Config) -> ProxyServerBuilder {
        ProxyServerBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bind every configured listener and serve until the task is dropped.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let bind = self.config.bind_address;

        let http_addr = SocketAddr::new(bind, self.config.http_port);
        let http_listener = create_reusable_listener(http_addr)?;
        info!("Listening on http://{}", http_addr);

        let https = if self.config.include_https {
            let tls = self.config.tls.as_ref().ok_or(ConfigError::MissingTls)?;
            let acceptor = create_tls_acceptor(&tls.cert_path, &tls.key_path)?;
            let addr = SocketAddr::new(bind, self.config.https_port);
            let listener = create_reusable_listener(addr)?;
            info!("Listening on https://{}", addr);
            Some((listener, acceptor))
        } else {
            None
        };

        let metrics = match &self.config.metrics {
            Some(metrics) => {
                let addr = SocketAddr::new(bind, metrics.port);
                let listener = create_reusable_listener(addr)?;
                info!("Metrics available at http://{}/metrics", addr);
                Some(listener)
            }
            None => None,
        };

        let server = Arc::new(self);
        tokio::join!(
            Arc::clone(&server).serve(http_listener),
            async {
                if let Some((listener, acceptor)) = https {
                    Arc::clone(&server).serve_tls(listener, acceptor).await;
                }
            },
            async {
                if let Some(listener) = metrics {
                    serve_metrics(listener).await;
                }
            },
        );
        Ok(())
    }

    /// Accept plain TCP connections forever.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (stream, peer) = accept_next("proxy", || listener.accept()).await;
            if let Err(e) = stream.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
            }

            let server = Arc::clone(&self);
            tokio::spawn(async move {
                server.serve_connection(stream, peer).await;
            });
        }
    }

    /// Accept TLS connections forever. The handshake runs in the
    /// connection task.
    pub async fn serve_tls(self: Arc<Self>, listener: TcpListener, acceptor: TlsAcceptor) {
        loop {
            let (stream, peer) = accept_next("TLS", || listener.accept()).await;

            let server = Arc::clone(&self);
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                match acceptor.accept(stream).await {
                    Ok(tls_stream) => server.serve_connection(tls_stream, peer).await,
                    Err(err) => {
                        error!("TLS handshake failed from {}: {}", peer, err);
                        server
                            .sink
                            .emit(ProxyEvent::error(Some(peer.to_string().as_str()), &err));
                    }
                }
            });
        }
    }

    async fn serve_connection<I>(&self, io: I, peer: SocketAddr)
    where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        debug!("Accepted connection from {}", peer);
        let conn = Arc::new(ConnectionState::new(peer));

        let handler = Arc::clone(&self.handler);
        let service_conn = Arc::clone(&conn);
        let service = service_fn(move |req: Request<Incoming>| {
            let handler = Arc::clone(&handler);
            let conn = Arc::clone(&service_conn);
            async move { handler.handle(req, &conn).await }
        });

        let result = http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(true)
            .timer(TokioTimer::new())
            .serve_connection(TokioIo::new(io), service)
            .with_upgrades()
            .await;

        if let Err(err) = result {
            error!("Error serving connection from {}: {}", peer, err);
        }

        // Tunneled connections report their own close when the relay ends.
        if !conn.is_tunneled() {
            self.sink.emit(ProxyEvent::Close { peer });
        }
    }
}

/// Accept the next connection, pausing after each failure.
async fn accept_next<T, F, Fut>(listener: &str, mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                warn!("Failed to accept {} connection: {}", listener, e);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}

/// Serve the Prometheus text format on `GET /metrics`.
pub async fn serve_metrics(listener: TcpListener) {
    loop {
        let (stream, peer) = accept_next("metrics", || listener.accept()).await;

        tokio::spawn(async move {
            let service = service_fn(|req: Request<Incoming>| async move {
                Ok::<_, Infallible>(metrics_response(&req))
            });
            if let Err(err) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("Error serving metrics to {}: {}", peer, err);
            }
        });
    }
}

fn metrics_response<B>(req: &Request<B>) -> Response<ProxyBody> {
    let (status, body) = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => (StatusCode::OK, Bytes::from(collect_metrics())),
        (_, "/metrics") => (StatusCode::METHOD_NOT_ALLOWED, Bytes::new()),
        _ => (StatusCode::NOT_FOUND, Bytes::from_static(b"Not Found")),
    };
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    if status == StatusCode::OK {
        response.headers_mut().insert(
            hyper::header::CONTENT_TYPE,
            hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
        );
    }
    response.into_boxed()
}
