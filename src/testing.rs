//! Fakes and local network peers shared by the unit tests.

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::TransportError;
use crate::proxy::Endpoint;
use crate::source::ProxySource;
use crate::transport::{HttpTransport, OutboundRequest, TransportResponse};

/// Serve the same HTTP response to every connection.
pub(crate) async fn serve_fixed(status: u16, body: &str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let status = StatusCode::from_u16(status).unwrap();
    let response = format!(
        "HTTP/1.1 {} {}\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown"),
        body.len(),
        body
    );

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let response = response.clone();
            tokio::spawn(async move {
                read_request(&mut stream).await;
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}

/// Accept connections and never answer them.
pub(crate) async fn serve_silent() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

/// An address nothing is listening on.
pub(crate) fn unused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

async fn read_request(stream: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let Ok(n) = stream.read(&mut chunk).await else {
            return;
        };
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf);
        if let Some(end) = text.find("\r\n\r\n") {
            let content_length = text[..end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + content_length {
                return;
            }
        }
    }
}

/// A successful fake response.
pub(crate) fn respond(status: u16, body: &str) -> Result<TransportResponse, TransportError> {
    Ok(TransportResponse {
        status: StatusCode::from_u16(status).unwrap(),
        body: body.to_string(),
    })
}

/// A failed fake exchange.
pub(crate) fn time_out() -> Result<TransportResponse, TransportError> {
    Err(TransportError::Timeout)
}

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub via: Option<Endpoint>,
    pub url: String,
    pub body: Option<String>,
}

type Handler =
    dyn Fn(Option<&Endpoint>, &OutboundRequest) -> Result<TransportResponse, TransportError> + Send + Sync;

/// Scriptable `HttpTransport` that records calls and peak concurrency.
pub(crate) struct FakeTransport {
    handler: Box<Handler>,
    delay: Duration,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeTransport {
    pub fn new(
        handler: impl Fn(Option<&Endpoint>, &OutboundRequest) -> Result<TransportResponse, TransportError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn execute(
        &self,
        via: Option<&Endpoint>,
        request: &OutboundRequest,
    ) -> Result<TransportResponse, TransportError> {
        self.calls.lock().push(Call {
            via: via.cloned(),
            url: request.url.clone(),
            body: request.body.clone(),
        });
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.handler)(via, request)
    }
}

/// One scripted `fetch` outcome.
pub(crate) enum Step {
    Endpoints(Vec<Endpoint>),
    Panic,
}

/// `ProxySource` that replays a script, then returns nothing.
pub(crate) struct ScriptedSource {
    steps: Mutex<VecDeque<Step>>,
    fetches: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProxySource for ScriptedSource {
    async fn fetch(&self) -> HashSet<Endpoint> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().pop_front();
        match step {
            Some(Step::Endpoints(endpoints)) => endpoints.into_iter().collect(),
            Some(Step::Panic) => panic!("scripted source failure"),
            None => HashSet::new(),
        }
    }
}

/// `host:port` endpoints named after the given hosts.
pub(crate) fn endpoints(hosts: &[&str]) -> Vec<Endpoint> {
    hosts
        .iter()
        .enumerate()
        .map(|(i, host)| Endpoint::new(crate::proxy::Scheme::Http, *host, 8000 + i as u16))
        .collect()
}
