//! Common test utilities for integration tests
//!
//! In-process stub servers standing in for the classification engine. Each
//! server binds an OS-assigned port on 127.0.0.1 and runs on background
//! threads for the rest of the test process.

#![allow(dead_code)]

use rceload_common::SyntheticEvent;
use rceload_protocols::WireDecoder;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Byte the engine answers each accepted message with
pub const ACK_SUCCESS: u8 = 127;

/// What a wire sink answers after each decoded message
#[derive(Debug, Clone, Copy)]
pub enum AckMode {
    Silent,
    Reply(u8),
}

/// TCP listener decoding every wire message it receives
pub struct WireSink {
    addr: SocketAddr,
    events: Arc<Mutex<Vec<SyntheticEvent>>>,
    decode_errors: Arc<Mutex<u64>>,
}

impl WireSink {
    pub fn start(ack: AckMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind wire sink");
        let addr = listener.local_addr().expect("Failed to get local addr");
        let events = Arc::new(Mutex::new(Vec::new()));
        let decode_errors = Arc::new(Mutex::new(0));

        let sink_events = events.clone();
        let sink_errors = decode_errors.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let events = sink_events.clone();
                let errors = sink_errors.clone();
                thread::spawn(move || serve_wire(stream, ack, events, errors));
            }
        });

        Self { addr, events, decode_errors }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn events(&self) -> Vec<SyntheticEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn decode_errors(&self) -> u64 {
        *self.decode_errors.lock().unwrap()
    }

    /// Wait until at least `count` messages arrived, returning the count seen
    pub fn wait_for(&self, count: usize, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let seen = self.events.lock().unwrap().len();
            if seen >= count || Instant::now() >= deadline {
                return seen;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}

fn serve_wire(
    mut stream: TcpStream,
    ack: AckMode,
    events: Arc<Mutex<Vec<SyntheticEvent>>>,
    errors: Arc<Mutex<u64>>,
) {
    let mut decoder = WireDecoder::new();
    let mut buf = [0u8; 16 * 1024];

    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.extend(&buf[..n]);

        loop {
            match decoder.next_event() {
                Ok(Some(event)) => {
                    events.lock().unwrap().push(event);
                    if let AckMode::Reply(byte) = ack {
                        if stream.write_all(&[byte]).is_err() {
                            return;
                        }
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    *errors.lock().unwrap() += 1;
                    return;
                }
            }
        }
    }
}

/// UDP socket decoding one wire message per datagram
pub struct UdpSink {
    addr: SocketAddr,
    events: Arc<Mutex<Vec<SyntheticEvent>>>,
}

impl UdpSink {
    pub fn start() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("Failed to bind UDP sink");
        let addr = socket.local_addr().expect("Failed to get local addr");
        let events = Arc::new(Mutex::new(Vec::new()));

        let sink_events = events.clone();
        thread::spawn(move || {
            let mut buf = vec![0u8; 65_536];
            while let Ok((n, _)) = socket.recv_from(&mut buf) {
                if let Ok(event) = rceload_protocols::decode(&buf[..n]) {
                    sink_events.lock().unwrap().push(event);
                }
            }
        });

        Self { addr, events }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn wait_for(&self, count: usize, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let seen = self.events.lock().unwrap().len();
            if seen >= count || Instant::now() >= deadline {
                return seen;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}

/// How a stub servlet builds its response body
#[derive(Debug, Clone, Copy)]
pub enum ServletMode {
    /// `<h1>{message}</h1>` echoing the `message` query parameter
    Echo,
    /// 200 OK with an empty body
    Empty,
    /// 500 with the echo body
    Failing,
}

/// Minimal HTTP/1.1 keep-alive server
pub struct StubServlet {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

impl StubServlet {
    pub fn start(mode: ServletMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind servlet");
        let addr = listener.local_addr().expect("Failed to get local addr");
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = requests.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let recorded = recorded.clone();
                thread::spawn(move || serve_http(stream, mode, recorded));
            }
        });

        Self { addr, requests }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr, path_and_query)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn serve_http(mut stream: TcpStream, mode: ServletMode, requests: Arc<Mutex<Vec<RecordedRequest>>>) {
    let mut data = Vec::new();
    let mut buf = [0u8; 8192];

    loop {
        let Some(header_end) = find_subslice(&data, b"\r\n\r\n") else {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => data.extend_from_slice(&buf[..n]),
            }
            continue;
        };

        let head = String::from_utf8_lossy(&data[..header_end]).to_string();
        let mut lines = head.lines();
        let request_line = lines.next().unwrap_or_default().to_string();
        let content_length = lines
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);

        let body_start = header_end + 4;
        while data.len() < body_start + content_length {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => data.extend_from_slice(&buf[..n]),
            }
        }
        let body = data[body_start..body_start + content_length].to_vec();
        data.drain(..body_start + content_length);

        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let path = parts.next().unwrap_or_default().to_string();
        let message = path
            .split_once('?')
            .and_then(|(_, query)| {
                query.split('&').find_map(|pair| pair.strip_prefix("message=").map(str::to_string))
            })
            .unwrap_or_default();

        requests.lock().unwrap().push(RecordedRequest { method, path, body });

        let (status, body) = match mode {
            ServletMode::Echo => ("200 OK", format!("<h1>{message}</h1>")),
            ServletMode::Empty => ("200 OK", String::new()),
            ServletMode::Failing => ("500 Internal Server Error", format!("<h1>{message}</h1>")),
        };
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        if stream.write_all(response.as_bytes()).is_err() {
            return;
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// An address nothing listens on
pub fn closed_port_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind to port 0");
    let addr = listener.local_addr().expect("Failed to get local addr");
    drop(listener);
    addr
}

/// Write `content` as a profile file inside `dir`
pub fn write_profile(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("Failed to write profile");
    path
}
