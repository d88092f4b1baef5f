//! Shared helpers for the integration tests: an in-process proxy with a
//! fixed clock, a tiny HTTP origin and a TCP echo server.

#![allow(dead_code)]

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use warden_proxy::access::{FixedClock, MinuteOfDay};
use warden_proxy::events::ChannelSink;
use warden_proxy::proxy::{Dialer, ProxyError, TcpDialer};
use warden_proxy::{Config, ProxyEvent, ProxyServer};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestProxy {
    pub addr: SocketAddr,
    pub events: mpsc::Receiver<ProxyEvent>,
}

impl TestProxy {
    /// Wait for the next event with the given name, skipping others.
    pub async fn expect_event(&mut self, name: &str) -> ProxyEvent {
        let wait = async {
            loop {
                match self.events.recv().await {
                    Some(event) if event.name() == name => return event,
                    Some(_) => continue,
                    None => panic!("event channel closed while waiting for {name}"),
                }
            }
        };
        tokio::time::timeout(EVENT_TIMEOUT, wait)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {name} event"))
    }

    /// Every event received until `name` shows up, inclusive.
    pub async fn events_until(&mut self, name: &str) -> Vec<ProxyEvent> {
        let mut seen = Vec::new();
        let wait = async {
            loop {
                match self.events.recv().await {
                    Some(event) => {
                        let done = event.name() == name;
                        seen.push(event);
                        if done {
                            return;
                        }
                    }
                    None => panic!("event channel closed while waiting for {name}"),
                }
            }
        };
        tokio::time::timeout(EVENT_TIMEOUT, wait)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {name} event"));
        seen
    }
}

/// Start a proxy on an ephemeral loopback port with the clock fixed at
/// `hour:minute`.
pub async fn start_proxy(yaml: &str, hour: u16, minute: u16) -> TestProxy {
    start_proxy_with_dialer(yaml, hour, minute, None).await
}

pub async fn start_proxy_with_dialer(
    yaml: &str,
    hour: u16,
    minute: u16,
    dialer: Option<Arc<dyn Dialer>>,
) -> TestProxy {
    let config = Config::from_yaml(yaml).expect("test config");
    let (sink, events) = ChannelSink::new(1024);
    let clock = FixedClock(MinuteOfDay::from_hm(hour, minute).expect("valid time"));

    let mut builder = ProxyServer::builder(config)
        .sink(Arc::new(sink))
        .clock(Arc::new(clock));
    if let Some(dialer) = dialer {
        builder = builder.dialer(dialer);
    }
    let server = Arc::new(builder.build().expect("proxy builds"));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve(listener));

    TestProxy { addr, events }
}

/// HTTP origin answering `origin saw <method> <path>`, followed by
/// `: <body>` when the request had one. `/teapot` answers 418 with an
/// `x-origin` header instead.
pub async fn start_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                continue;
            };
            tokio::spawn(async move {
                let service = service_fn(origin_response);
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });
    addr
}

async fn origin_response(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, hyper::Error> {
    if req.uri().path() == "/teapot" {
        let response = Response::builder()
            .status(StatusCode::IM_A_TEAPOT)
            .header("x-origin", "teapot")
            .body(Full::new(Bytes::from_static(b"short and stout")))
            .expect("static response");
        return Ok(response);
    }

    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();
    let mut text = format!("origin saw {} {}", parts.method, parts.uri.path());
    if !body.is_empty() {
        text.push_str(": ");
        text.push_str(&String::from_utf8_lossy(&body));
    }
    Ok(Response::new(Full::new(Bytes::from(text))))
}

/// TCP server echoing every byte until the peer closes.
pub async fn start_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                continue;
            };
            tokio::spawn(async move {
                let (mut rd, mut wr) = stream.split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
                let _ = wr.shutdown().await;
            });
        }
    });
    addr
}

/// A loopback port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Read a response head up to and including the blank line.
pub async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.unwrap();
        if n == 0 {
            break;
        }
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

/// Counts dial attempts and delegates to a real dialer.
pub struct CountingDialer {
    pub calls: AtomicUsize,
    inner: TcpDialer,
}

impl CountingDialer {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            inner: TcpDialer::new(Duration::from_secs(2)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for CountingDialer {
    async fn dial(&self, addr: &str) -> Result<TcpStream, ProxyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.dial(addr).await
    }
}
