//! HTTP dispatcher
//!
//! Each event becomes one request against a fixed URL: a POST carrying the
//! wire message, or a body-less GET for the health-check variant. The
//! response counts as delivered only when it is 2xx and its body contains
//! the expected marker. Requests block the worker for one round trip, so a
//! dispatcher serves a single logical client; scale out with more workers.

use super::{DeliveryOutcome, ErrorKind, OutcomeRecorder};
use crate::cancel::CancellationToken;
use crate::{Error, Result};
use rceload_common::SyntheticEvent;
use rceload_protocols::http::{build_request, parse_response, HttpMethod, HttpResponse, HttpTarget};
use rceload_protocols::wire;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

/// Marker the reference servlet echoes back
pub const DEFAULT_MARKER: &str = "Testing";

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub target: HttpTarget,
    pub method: HttpMethod,
    /// Literal token a successful response body contains
    pub marker: String,
    pub pacing: Duration,
    pub connect_timeout: Duration,
    /// Read and write timeout for one round trip
    pub io_timeout: Duration,
    pub duration: Option<Duration>,
}

impl HttpConfig {
    pub fn new(target: HttpTarget) -> Self {
        Self {
            target,
            method: HttpMethod::Post,
            marker: DEFAULT_MARKER.to_string(),
            pacing: Duration::ZERO,
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(10),
            duration: None,
        }
    }
}

struct Connection {
    stream: TcpStream,
    buf: Vec<u8>,
}

pub struct HttpDispatcher {
    config: HttpConfig,
    addr: SocketAddr,
    cancel: CancellationToken,
}

impl HttpDispatcher {
    /// Resolve the target once; it stays fixed for the dispatcher's lifetime
    pub fn new(config: HttpConfig) -> Result<Self> {
        let authority = config.target.authority();
        let addr = authority
            .to_socket_addrs()
            .map_err(|e| Error::Config(format!("cannot resolve {authority}: {e}")))?
            .next()
            .ok_or_else(|| Error::Config(format!("{authority} resolved to no address")))?;

        Ok(Self { config, addr, cancel: CancellationToken::new() })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Deliver `events` in order, one outcome each
    ///
    /// Stops early on cancellation or when the configured duration elapses.
    /// The keep-alive connection is reused across events and reopened after
    /// any failure.
    pub fn run<I, R>(&self, client_id: usize, events: I, recorder: &mut R) -> Result<()>
    where
        I: IntoIterator<Item = SyntheticEvent>,
        R: OutcomeRecorder + ?Sized,
    {
        let deadline = self.config.duration.map(|d| Instant::now() + d);
        let mut conn = None;

        for (index, event) in events.into_iter().enumerate() {
            if self.cancel.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }

            let outcome = self.deliver(&mut conn, client_id, index as u64, &event);
            recorder.record(outcome);

            if !self.config.pacing.is_zero() {
                let mut pause = self.config.pacing;
                if let Some(d) = deadline {
                    pause = pause.min(d.saturating_duration_since(Instant::now()));
                }
                if !self.cancel.sleep(pause) {
                    break;
                }
            }
        }

        tracing::debug!("HTTP client {} finished", client_id);
        Ok(())
    }

    /// Send one event and classify the response
    fn deliver(
        &self,
        conn: &mut Option<Connection>,
        client_id: usize,
        index: u64,
        event: &SyntheticEvent,
    ) -> DeliveryOutcome {
        let body = match self.config.method {
            HttpMethod::Post => Some(wire::encode(event)),
            HttpMethod::Get => None,
        };
        let request = build_request(self.config.method, &self.config.target, body.as_deref());
        let bytes = request.len();
        let started = Instant::now();

        let response = match self.exchange(conn, &request) {
            Ok(response) => response,
            Err(e) => {
                *conn = None;
                tracing::warn!(
                    "Client {} event {}: request to {} failed: {}",
                    client_id,
                    index,
                    self.config.target,
                    e
                );
                return DeliveryOutcome::failed(
                    client_id,
                    index,
                    ErrorKind::HttpTransportError,
                    bytes,
                );
            }
        };
        let latency = started.elapsed();

        if !response.keep_alive {
            *conn = None;
        }

        if let Err(e) = response.error_for_status() {
            tracing::warn!("Client {} event {}: {} from {}", client_id, index, e, self.config.target);
            return DeliveryOutcome::failed(client_id, index, ErrorKind::ResponseMismatch, bytes);
        }
        if !response.contains_marker(&self.config.marker) {
            tracing::warn!(
                "Client {} event {}: response from {} lacks marker {:?}",
                client_id,
                index,
                self.config.target,
                self.config.marker
            );
            return DeliveryOutcome::failed(client_id, index, ErrorKind::ResponseMismatch, bytes);
        }

        DeliveryOutcome::succeeded(client_id, index, latency, bytes)
    }

    fn open(&self) -> Result<Connection> {
        let stream = TcpStream::connect_timeout(&self.addr, self.config.connect_timeout)?;
        stream.set_read_timeout(Some(self.config.io_timeout))?;
        stream.set_write_timeout(Some(self.config.io_timeout))?;
        stream.set_nodelay(true)?;
        Ok(Connection { stream, buf: Vec::with_capacity(4096) })
    }

    fn exchange(&self, conn: &mut Option<Connection>, request: &[u8]) -> Result<HttpResponse> {
        let c = match conn.take() {
            Some(c) => c,
            None => self.open()?,
        };
        let c = conn.insert(c);

        c.stream.write_all(request)?;
        c.buf.clear();

        let mut chunk = [0u8; 4096];
        loop {
            if let Some((response, _)) = parse_response(&c.buf, false)? {
                return Ok(response);
            }

            let n = c.stream.read(&mut chunk)?;
            if n == 0 {
                return match parse_response(&c.buf, true)? {
                    Some((mut response, _)) => {
                        response.keep_alive = false;
                        Ok(response)
                    }
                    None => Err(Error::Connection("connection closed before response".to_string())),
                };
            }
            c.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::{generate, DistributionSpec, EventCount};
    use std::net::TcpListener;
    use std::thread;

    /// Read one request head plus its Content-Length body
    fn read_request(stream: &mut TcpStream) -> Option<String> {
        let mut data = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            if let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&data[..end]).to_string();
                let body_len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("Content-Length: "))
                    .map(|v| v.trim().parse::<usize>().unwrap())
                    .unwrap_or(0);
                if data.len() >= end + 4 + body_len {
                    return Some(head);
                }
            }
            let n = stream.read(&mut chunk).ok()?;
            if n == 0 {
                return None;
            }
            data.extend_from_slice(&chunk[..n]);
        }
    }

    /// Answer every request on every connection with `body`
    fn serve(body: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let mut stream = stream.unwrap();
                thread::spawn(move || {
                    while read_request(&mut stream).is_some() {
                        let reply = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{}",
                            body.len(),
                            body
                        );
                        if stream.write_all(reply.as_bytes()).is_err() {
                            return;
                        }
                    }
                });
            }
        });
        addr
    }

    fn dispatcher(addr: SocketAddr) -> HttpDispatcher {
        let url = format!("http://{addr}/rce-loadtest/ReferenceServlet?message=Testing");
        HttpDispatcher::new(HttpConfig::new(HttpTarget::parse(&url).unwrap())).unwrap()
    }

    fn events(count: u64) -> impl Iterator<Item = SyntheticEvent> {
        let spec = DistributionSpec::new(3, 10, 0.6).unwrap();
        generate(spec, EventCount::Finite(count), Some(1)).unwrap()
    }

    #[test]
    fn test_marker_present_is_success() {
        let dispatcher = dispatcher(serve("<h1>Testing</h1>"));
        let mut outcomes = Vec::new();
        dispatcher.run(0, events(10), &mut outcomes).unwrap();

        assert_eq!(outcomes.len(), 10);
        assert!(outcomes.iter().all(|o| o.success && o.latency.is_some()));
    }

    #[test]
    fn test_empty_body_is_mismatch() {
        let dispatcher = dispatcher(serve(""));
        let mut outcomes = Vec::new();
        dispatcher.run(0, events(3), &mut outcomes).unwrap();

        assert_eq!(outcomes.len(), 3);
        for outcome in outcomes {
            assert_eq!(outcome.error_kind, Some(ErrorKind::ResponseMismatch));
        }
    }

    #[test]
    fn test_unreachable_target_is_transport_error() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let dispatcher = dispatcher(addr);
        let mut outcomes = Vec::new();
        dispatcher.run(0, events(2), &mut outcomes).unwrap();

        assert_eq!(outcomes.len(), 2);
        for outcome in outcomes {
            assert_eq!(outcome.error_kind, Some(ErrorKind::HttpTransportError));
        }
    }

    #[test]
    fn test_get_sends_no_body() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let head = read_request(&mut stream).unwrap();
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 16\r\n\r\n<h1>Testing</h1>")
                .unwrap();
            head
        });

        let url = format!("http://{addr}/servlet?message=Testing");
        let mut config = HttpConfig::new(HttpTarget::parse(&url).unwrap());
        config.method = HttpMethod::Get;
        let mut outcomes = Vec::new();
        HttpDispatcher::new(config).unwrap().run(0, events(1), &mut outcomes).unwrap();

        assert!(outcomes[0].success);
        let head = server.join().unwrap();
        assert!(head.starts_with("GET /servlet?message=Testing HTTP/1.1"));
        assert!(!head.contains("Content-Type"));
    }

    #[test]
    fn test_cancelled_before_start_sends_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let dispatcher = dispatcher(serve("<h1>Testing</h1>")).with_cancellation(cancel);

        let mut outcomes = Vec::new();
        dispatcher.run(0, events(5), &mut outcomes).unwrap();
        assert!(outcomes.is_empty());
    }
}
