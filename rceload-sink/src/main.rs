//! rceload sink
//!
//! Stub ingestion server for manual rceload runs:
//! - `tcp`: decodes concatenated wire messages and counts them, optionally
//!   answering each with the success byte 127
//! - `udp`: decodes one wire message per datagram
//! - `http`: reference servlet answering `<h1>{message}</h1>` with the
//!   `message` query parameter of the request

use anyhow::Result;
use clap::{Parser, Subcommand};
use rceload_protocols::{decode, query_param, WireDecoder};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Byte the engine answers each accepted message with
const ACK_SUCCESS: u8 = 127;

const MAX_HEADERS: usize = 32;

#[derive(Parser, Debug)]
#[command(name = "rceload-sink")]
#[command(about = "Stub event ingestion server for rceload runs")]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0", global = true)]
    bind: String,

    /// Seconds between throughput reports (0 disables)
    #[arg(long, default_value = "5", global = true)]
    report_interval: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Wire messages over TCP
    Tcp {
        #[arg(short, long, default_value = "9000")]
        port: u16,

        /// Answer every decoded message with the success byte
        #[arg(long)]
        ack: bool,
    },
    /// One wire message per UDP datagram
    Udp {
        #[arg(short, long, default_value = "9001")]
        port: u16,
    },
    /// Reference servlet over HTTP/1.1
    Http {
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
}

/// Counters shared by every connection
#[derive(Default)]
struct Counters {
    messages: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn record(&self, bytes: usize) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

async fn handle_tcp(mut socket: TcpStream, ack: bool, counters: Arc<Counters>) -> Result<()> {
    let peer_addr = socket.peer_addr()?;
    debug!("New connection from: {peer_addr}");

    let mut decoder = WireDecoder::new();
    let mut buffer = vec![0u8; 64 * 1024];
    let mut acks = Vec::new();

    loop {
        let n = socket.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        decoder.extend(&buffer[..n]);

        let before = decoder.decoded_count();
        let pending_before = decoder.pending_bytes();
        match decoder.drain_events() {
            Ok(events) => {
                let consumed = pending_before - decoder.pending_bytes();
                counters.messages.fetch_add(events.len() as u64, Ordering::Relaxed);
                counters.bytes.fetch_add(consumed as u64, Ordering::Relaxed);
            }
            Err(e) => {
                counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!("Undecodable stream from {peer_addr}, closing: {e}");
                break;
            }
        }

        if ack {
            let new = (decoder.decoded_count() - before) as usize;
            acks.clear();
            acks.resize(new, ACK_SUCCESS);
            socket.write_all(&acks).await?;
        }
    }

    debug!(
        "Connection from {peer_addr} closed after {} messages",
        decoder.decoded_count()
    );
    Ok(())
}

async fn run_tcp(addr: &str, ack: bool, counters: Arc<Counters>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("TCP sink listening on {addr} (ack: {ack})");

    loop {
        let (socket, peer) = listener.accept().await?;
        if let Err(e) = socket.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {peer}: {e}");
        }

        let counters = counters.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_tcp(socket, ack, counters).await {
                warn!("Error handling client {peer}: {e}");
            }
        });
    }
}

async fn run_udp(addr: &str, counters: Arc<Counters>) -> Result<()> {
    let socket = UdpSocket::bind(addr).await?;
    info!("UDP sink listening on {addr}");

    let mut buffer = vec![0u8; 65_536];
    loop {
        let (n, peer) = socket.recv_from(&mut buffer).await?;
        match decode(&buffer[..n]) {
            Ok(_) => counters.record(n),
            Err(e) => {
                counters.errors.fetch_add(1, Ordering::Relaxed);
                debug!("Undecodable datagram from {peer}: {e}");
            }
        }
    }
}

/// Parsed request head: message parameter, body length, head length, keep-alive
struct RequestHead {
    message: String,
    content_length: usize,
    head_len: usize,
    keep_alive: bool,
}

fn parse_request(data: &[u8]) -> Result<Option<RequestHead>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);

    let head_len = match request.parse(data)? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Ok(None),
    };

    let header = |name: &str| {
        request
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .and_then(|h| std::str::from_utf8(h.value).ok())
            .map(str::trim)
    };

    let content_length = header("content-length").and_then(|v| v.parse().ok()).unwrap_or(0);
    let keep_alive = !matches!(header("connection"), Some(v) if v.eq_ignore_ascii_case("close"));
    let message = query_param(request.path.unwrap_or("/"), "message").unwrap_or("").to_string();

    Ok(Some(RequestHead { message, content_length, head_len, keep_alive }))
}

async fn handle_http(mut socket: TcpStream, counters: Arc<Counters>) -> Result<()> {
    let peer_addr = socket.peer_addr()?;
    let mut data = Vec::new();
    let mut buffer = vec![0u8; 16 * 1024];

    loop {
        let Some(head) = parse_request(&data)? else {
            let n = socket.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buffer[..n]);
            continue;
        };

        let total = head.head_len + head.content_length;
        while data.len() < total {
            let n = socket.read(&mut buffer).await?;
            if n == 0 {
                return Ok(());
            }
            data.extend_from_slice(&buffer[..n]);
        }
        data.drain(..total);
        counters.record(head.content_length);

        let body = format!("<h1>{}</h1>", head.message);
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\n{}\r\n{body}",
            body.len(),
            if head.keep_alive { "" } else { "Connection: close\r\n" }
        );
        socket.write_all(response.as_bytes()).await?;

        if !head.keep_alive {
            break;
        }
    }

    debug!("HTTP connection from {peer_addr} closed");
    Ok(())
}

async fn run_http(addr: &str, counters: Arc<Counters>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP reference servlet listening on {addr}");

    loop {
        let (socket, peer) = listener.accept().await?;
        let counters = counters.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_http(socket, counters).await {
                warn!("Error handling client {peer}: {e}");
            }
        });
    }
}

async fn report(counters: Arc<Counters>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    let mut last = 0;

    loop {
        ticker.tick().await;
        let messages = counters.messages.load(Ordering::Relaxed);
        info!(
            "{} messages total ({:.1}/s), {} bytes, {} errors",
            messages,
            (messages - last) as f64 / interval.as_secs_f64(),
            counters.bytes.load(Ordering::Relaxed),
            counters.errors.load(Ordering::Relaxed)
        );
        last = messages;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let counters = Arc::new(Counters::default());
    if args.report_interval > 0 {
        tokio::spawn(report(counters.clone(), Duration::from_secs(args.report_interval)));
    }

    let port = match args.mode {
        Mode::Tcp { port, .. } | Mode::Udp { port } | Mode::Http { port } => port,
    };
    let addr: SocketAddr = format!("{}:{}", args.bind, port).parse()?;
    let addr = addr.to_string();

    match args.mode {
        Mode::Tcp { ack, .. } => run_tcp(&addr, ack, counters).await,
        Mode::Udp { .. } => run_udp(&addr, counters).await,
        Mode::Http { .. } => run_http(&addr, counters).await,
    }
}
