//! HTTP CONNECT tunneling.
//!
//! The flow for an allowed CONNECT is:
//!
//! 1. Dial the target (bounded by the connect timeout). On failure answer
//!    `500 Connection error` and close.
//! 2. Answer `200 Connection established` and let hyper hand over the raw
//!    client connection. Bytes the client sent after the CONNECT head are
//!    delivered first by the upgraded stream, so they reach the upstream
//!    before anything else.
//! 3. Relay bytes in both directions. When one leg reaches end-of-stream
//!    the other leg is half-closed and the opposite direction keeps
//!    flowing until it ends or stays quiet for the shutdown grace. An error
//!    or an idle tunnel closes both legs at once.
//!
//! The relay never inspects the bytes it moves.

use super::context::TunnelTarget;
use super::error::ProxyError;
use super::headers::{ProxyHeadersExt, CONNECTION, VALUE_CLOSE};
use super::network::Dialer;
use super::response_ext::{ProxyBody, ResponseExt};
use crate::events::{EventSink, ProxyEvent};
use http_body_util::Empty;
use hyper::body::{Bytes, Incoming};
use hyper::ext::ReasonPhrase;
use hyper::{Request, Response, StatusCode, Version};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, warn};

pub const ESTABLISHED_REASON: &[u8] = b"Connection established";
pub const DENIED_REASON: &[u8] = b"Access denied";
pub const CONNECTION_ERROR_REASON: &[u8] = b"Connection error";

const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// Upper bound on flushing and shutting down both legs once a tunnel ends.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Bodiless response whose status line carries a custom reason phrase,
/// e.g. `HTTP/1.1 403 Access denied`. Non-2xx responses close the connection.
pub fn status_line_response(status: StatusCode, reason: &'static [u8]) -> Response<ProxyBody> {
    let mut response = Response::new(Empty::<Bytes>::new());
    *response.status_mut() = status;
    response
        .extensions_mut()
        .insert(ReasonPhrase::from_static(reason));
    if !status.is_success() {
        response.set_header(&CONNECTION, &VALUE_CLOSE);
    }
    response.into_boxed()
}

pub fn denied_response() -> Response<ProxyBody> {
    status_line_response(StatusCode::FORBIDDEN, DENIED_REASON)
}

pub fn connection_error_response() -> Response<ProxyBody> {
    status_line_response(StatusCode::INTERNAL_SERVER_ERROR, CONNECTION_ERROR_REASON)
}

/// Opens tunnels for allowed CONNECT requests.
pub struct TunnelRelay {
    dialer: Arc<dyn Dialer>,
    sink: Arc<dyn EventSink>,
    idle_timeout: Duration,
}

impl TunnelRelay {
    pub fn new(dialer: Arc<dyn Dialer>, sink: Arc<dyn EventSink>, idle_timeout: Duration) -> Self {
        Self {
            dialer,
            sink,
            idle_timeout,
        }
    }

    /// Dial the target and, on success, spawn the relay for the upgraded
    /// connection. Returns the response that completes the CONNECT.
    pub async fn open(
        &self,
        target: &TunnelTarget,
        peer: SocketAddr,
        req: Request<Incoming>,
    ) -> Response<ProxyBody> {
        let addr = target.addr();
        let upstream = match self.dialer.dial(&addr).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Tunnel to {} failed: {}", addr, e);
                self.sink.emit(ProxyEvent::error(Some(addr.as_str()), &e));
                return connection_error_response();
            }
        };
        self.sink.emit(ProxyEvent::TunnelConnect {
            target: addr.clone(),
        });

        let session = TunnelSession {
            target: addr,
            peer,
            version: req.version(),
            sink: Arc::clone(&self.sink),
            idle_timeout: self.idle_timeout,
        };

        tokio::spawn(async move {
            match hyper::upgrade::on(req).await {
                Ok(upgraded) => {
                    session.run(TokioIo::new(upgraded), upstream).await;
                }
                Err(e) => {
                    let e = ProxyError::from(e);
                    warn!("CONNECT upgrade failed for {}: {}", session.target, e);
                    session
                        .sink
                        .emit(ProxyEvent::error(Some(session.target.as_str()), &e));
                    session.sink.emit(ProxyEvent::Close { peer: session.peer });
                }
            }
        });

        status_line_response(StatusCode::OK, ESTABLISHED_REASON)
    }
}

/// One side of a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Client,
    Upstream,
}

/// Why a tunnel ended.
#[derive(Debug)]
pub enum TunnelEnd {
    /// The leg reached end-of-stream.
    Closed(Leg),
    /// Reading from or writing to the leg failed.
    Failed(Leg, std::io::Error),
    /// Neither leg moved data for the idle timeout.
    Idle,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    /// client -> upstream
    Out,
    /// upstream -> client
    In,
}

impl Direction {
    fn source(self) -> Leg {
        match self {
            Direction::Out => Leg::Client,
            Direction::In => Leg::Upstream,
        }
    }

    fn destination(self) -> Leg {
        match self {
            Direction::Out => Leg::Upstream,
            Direction::In => Leg::Client,
        }
    }

    fn data_event(self, target: &str, bytes: usize) -> ProxyEvent {
        let target = target.to_string();
        match self {
            Direction::Out => ProxyEvent::TunnelDataOut { target, bytes },
            Direction::In => ProxyEvent::TunnelDataIn { target, bytes },
        }
    }
}

/// Last time either direction moved bytes.
struct Activity {
    started: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_ms.store(elapsed, Ordering::Relaxed);
    }

    fn last(&self) -> Instant {
        self.started + Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }
}

/// An established tunnel. Owns both legs until it ends.
pub struct TunnelSession {
    pub target: String,
    pub peer: SocketAddr,
    pub version: Version,
    pub sink: Arc<dyn EventSink>,
    pub idle_timeout: Duration,
}

impl TunnelSession {
    /// Relay until both legs end (or one fails or the tunnel idles), then
    /// close both.
    pub async fn run<C, U>(&self, client: C, upstream: U) -> TunnelEnd
    where
        C: AsyncRead + AsyncWrite + Unpin,
        U: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut client_rd, mut client_wr) = tokio::io::split(client);
        let (mut upstream_rd, mut upstream_wr) = tokio::io::split(upstream);
        let activity = Activity::new();

        debug!("Tunnel established for {}", self.target);

        // After an end-of-stream the opposite direction drains, bounded by
        // the shutdown grace measured from its last write.
        let end = {
            let out = self.pump(&mut client_rd, &mut upstream_wr, Direction::Out, &activity);
            let inbound = self.pump(&mut upstream_rd, &mut client_wr, Direction::In, &activity);
            tokio::pin!(out, inbound);

            let end = tokio::select! {
                end = &mut out => end,
                end = &mut inbound => end,
                _ = idle_watchdog(&activity, self.idle_timeout) => TunnelEnd::Idle,
            };
            self.report(&end);

            let drain_quiet = SHUTDOWN_GRACE.min(self.idle_timeout);
            activity.touch();
            let drained = match &end {
                TunnelEnd::Closed(Leg::Client) => tokio::select! {
                    rest = &mut inbound => Some(rest),
                    _ = idle_watchdog(&activity, drain_quiet) => None,
                },
                TunnelEnd::Closed(Leg::Upstream) => tokio::select! {
                    rest = &mut out => Some(rest),
                    _ = idle_watchdog(&activity, drain_quiet) => None,
                },
                _ => None,
            };
            match drained {
                Some(rest) => self.report(&rest),
                None if matches!(end, TunnelEnd::Closed(_)) => {
                    debug!(
                        "Tunnel {} stopped draining after {:?} without traffic",
                        self.target, drain_quiet
                    );
                }
                None => {}
            }
            end
        };

        let closing = async {
            if let TunnelEnd::Failed(Leg::Upstream, _) = &end {
                let line = format!("{:?} 500 Connection error\r\n\r\n", self.version);
                if let Err(e) = client_wr.write_all(line.as_bytes()).await {
                    debug!("Could not notify client of tunnel failure: {}", e);
                }
            }
            let _ = tokio::join!(client_wr.shutdown(), upstream_wr.shutdown());
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, closing).await.is_err() {
            debug!("Tunnel shutdown for {} timed out; dropping both legs", self.target);
        }

        self.sink.emit(ProxyEvent::Close { peer: self.peer });
        debug!("Tunnel closed for {}", self.target);
        end
    }

    /// Copy one direction, awaiting the destination before reading more.
    async fn pump<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        direction: Direction,
        activity: &Activity,
    ) -> TunnelEnd
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => {
                    if let Err(e) = writer.shutdown().await {
                        debug!("Half-close toward {:?} failed: {}", direction.destination(), e);
                    }
                    return TunnelEnd::Closed(direction.source());
                }
                Ok(n) => n,
                Err(e) => return TunnelEnd::Failed(direction.source(), e),
            };
            if let Err(e) = writer.write_all(&buf[..n]).await {
                return TunnelEnd::Failed(direction.destination(), e);
            }
            if let Err(e) = writer.flush().await {
                return TunnelEnd::Failed(direction.destination(), e);
            }
            activity.touch();
            self.sink.emit(direction.data_event(&self.target, n));
        }
    }

    fn report(&self, end: &TunnelEnd) {
        let target = self.target.clone();
        match end {
            TunnelEnd::Closed(Leg::Client) => self.sink.emit(ProxyEvent::TunnelEndOut { target }),
            TunnelEnd::Closed(Leg::Upstream) => self.sink.emit(ProxyEvent::TunnelEndIn { target }),
            TunnelEnd::Failed(leg, e) => {
                debug!("Tunnel {} failed on {:?} leg: {}", self.target, leg, e);
                self.sink.emit(ProxyEvent::error(Some(target.as_str()), e));
            }
            TunnelEnd::Idle => {
                debug!("Tunnel {} idle for {:?}", self.target, self.idle_timeout);
                self.sink.emit(ProxyEvent::error(
                    Some(target.as_str()),
                    ProxyError::Timeout("tunnel idle"),
                ));
            }
        }
    }
}

async fn idle_watchdog(activity: &Activity, idle: Duration) {
    loop {
        let deadline = activity.last() + idle;
        if Instant::now() >= deadline {
            return;
        }
        tokio::time::sleep_until(deadline).await;
    }
}
